//! Outbound record pipeline (RFC 5246 §6.2):
//!
//! ```text
//! fragment -> [compress] -> MAC -> [explicit IV, CBC padding] -> encrypt -> header
//! ```

use std::sync::Arc;

use bastion_types::TlsError;

use super::cipher_state::ConnectionCipherState;
use super::{
    clamp_fragment_size, encode_header, ContentType, MAX_CIPHERTEXT_LENGTH,
    MAX_COMPRESSED_LENGTH, MAX_PLAINTEXT_LENGTH,
};
use crate::alert::Alert;
use crate::crypt::ciphersuite::CipherSuiteInfo;
use crate::crypt::key_schedule::SessionKeys;
use crate::crypt::random::RandomSource;
use crate::crypt::registry::AlgorithmRegistry;
use crate::{ProtocolVersion, TlsRole};

/// Sink receiving every serialized record.
pub type OutputFn = Box<dyn FnMut(&[u8]) + Send>;

/// Frames, protects and emits records through the output sink.
pub struct RecordWriter {
    output: OutputFn,
    registry: Arc<AlgorithmRegistry>,
    rng: Arc<dyn RandomSource>,
    version: ProtocolVersion,
    max_fragment: usize,
    state: Option<ConnectionCipherState>,
}

impl RecordWriter {
    /// Records carry TLS 1.0 in their header until a version is negotiated.
    pub fn new(
        output: OutputFn,
        registry: Arc<AlgorithmRegistry>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            output,
            registry,
            rng,
            version: ProtocolVersion::TLS_V10,
            max_fragment: MAX_PLAINTEXT_LENGTH,
            state: None,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn max_fragment_size(&self) -> usize {
        self.max_fragment
    }

    /// Limit plaintext fragments; 0 restores the protocol maximum, other
    /// values are clamped to [128, 16384].
    pub fn set_maximum_fragment_size(&mut self, size: usize) {
        self.max_fragment = clamp_fragment_size(size);
    }

    /// Whether records are currently protected.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Sequence number of the next protected record, if active.
    pub fn sequence_number(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.sequence_number())
    }

    /// Install new keys for the records written by `side`. The sequence
    /// number restarts at 0.
    pub fn activate(
        &mut self,
        side: TlsRole,
        suite: &CipherSuiteInfo,
        keys: &SessionKeys,
        compression_method: u8,
    ) -> Result<(), TlsError> {
        self.state = Some(ConnectionCipherState::new(
            &self.registry,
            side,
            suite,
            keys,
            self.version,
            compression_method,
        )?);
        Ok(())
    }

    /// Drop all protection state and the fragment limit.
    pub fn reset(&mut self) {
        self.state = None;
        self.max_fragment = MAX_PLAINTEXT_LENGTH;
    }

    pub fn send_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        self.send(ContentType::Alert, &alert.to_bytes())
    }

    /// Send `data` as one or more records of at most the fragment limit.
    ///
    /// With a CBC cipher and an implicit IV (SSLv3, TLS 1.0), application
    /// data is sent as a 1-byte record followed by the remainder.
    pub fn send(&mut self, content_type: ContentType, data: &[u8]) -> Result<(), TlsError> {
        let mut input = data;

        let implicit_cbc_iv = self
            .state
            .as_ref()
            .is_some_and(|s| s.block_size() > 0 && s.iv_size() == 0);
        if content_type == ContentType::ApplicationData && implicit_cbc_iv && input.len() > 1 {
            self.send_record(content_type, &input[..1])?;
            input = &input[1..];
        }

        while !input.is_empty() {
            let take = input.len().min(self.max_fragment);
            self.send_record(content_type, &input[..take])?;
            input = &input[take..];
        }
        Ok(())
    }

    fn send_record(&mut self, content_type: ContentType, fragment: &[u8]) -> Result<(), TlsError> {
        if fragment.len() > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::InternalError(
                "record plaintext exceeds maximum".into(),
            ));
        }

        let Some(state) = self.state.as_mut() else {
            let mut out = Vec::with_capacity(5 + fragment.len());
            out.extend_from_slice(&encode_header(content_type, self.version, fragment.len()));
            out.extend_from_slice(fragment);
            log::trace!("record out: {:?} {} bytes (plaintext)", content_type, fragment.len());
            (self.output)(&out);
            return Ok(());
        };

        let compressed;
        let plaintext = match state.compressor_mut() {
            Some(c) => {
                compressed = c.compress(fragment)?;
                if compressed.len() > MAX_COMPRESSED_LENGTH {
                    return Err(TlsError::InternalError(
                        "compressed record too large".into(),
                    ));
                }
                compressed.as_slice()
            }
            None => fragment,
        };

        let seq = state.sequence_number();
        let mac = state.compute_mac(seq, content_type, plaintext)?;

        let block_size = state.block_size();
        let iv_size = state.iv_size();
        let mut body = Vec::with_capacity(iv_size + plaintext.len() + mac.len() + block_size);
        if iv_size > 0 {
            let mut iv = vec![0u8; iv_size];
            self.rng.fill(&mut iv)?;
            body.extend_from_slice(&iv);
        }
        body.extend_from_slice(plaintext);
        body.extend_from_slice(&mac);

        if block_size > 0 {
            // Every padding byte, including the length byte, equals pad_len.
            let pad_len = (block_size - ((body.len() + 1) % block_size)) % block_size;
            body.resize(body.len() + pad_len + 1, pad_len as u8);
        }

        if body.len() > MAX_CIPHERTEXT_LENGTH {
            return Err(TlsError::InternalError(
                "protected record too large".into(),
            ));
        }

        state.cipher_mut().encrypt(&mut body)?;
        state.next_sequence()?;

        let mut out = Vec::with_capacity(5 + body.len());
        out.extend_from_slice(&encode_header(content_type, self.version, body.len()));
        out.extend_from_slice(&body);
        log::trace!(
            "record out: {:?} seq={} {} bytes",
            content_type,
            seq,
            body.len()
        );
        (self.output)(&out);
        Ok(())
    }
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("version", &self.version)
            .field("max_fragment", &self.max_fragment)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
