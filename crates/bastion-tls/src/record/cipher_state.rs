//! Per-direction record protection state, created on every `activate`.

use bastion_types::TlsError;

use super::{compression_method_name, ContentType};
use crate::crypt::ciphersuite::CipherSuiteInfo;
use crate::crypt::key_schedule::SessionKeys;
use crate::crypt::registry::{AlgorithmRegistry, Compressor, RecordCipher, RecordMac};
use crate::{ProtocolVersion, TlsRole};

/// Cipher, MAC, optional compressor and sequence number for the records
/// written by one side of a connection.
pub struct ConnectionCipherState {
    version: ProtocolVersion,
    cipher: Box<dyn RecordCipher>,
    mac: Box<dyn RecordMac>,
    compressor: Option<Box<dyn Compressor>>,
    block_size: usize,
    iv_size: usize,
    seq: u64,
}

impl ConnectionCipherState {
    /// Resolve the suite's primitives through `registry` and key them with
    /// the material belonging to `writer_side`.
    pub fn new(
        registry: &AlgorithmRegistry,
        writer_side: TlsRole,
        suite: &CipherSuiteInfo,
        keys: &SessionKeys,
        version: ProtocolVersion,
        compression_method: u8,
    ) -> Result<Self, TlsError> {
        let cipher = registry.cipher(
            &suite.cipher.registry_name(),
            keys.cipher_key(writer_side),
            keys.iv(writer_side),
        )?;
        let mac = registry.mac(&suite.mac_name(version), keys.mac_key(writer_side))?;
        let compressor = match compression_method_name(compression_method)? {
            Some(name) => Some(registry.compressor(name)?),
            None => None,
        };

        let block_size = cipher.block_size().unwrap_or(0);
        let iv_size = if block_size > 0 && version.supports_explicit_cbc_ivs() {
            block_size
        } else {
            0
        };

        log::debug!(
            "record protection activated: {} {} for {:?} writes",
            suite.name,
            version,
            writer_side
        );

        Ok(Self {
            version,
            cipher,
            mac,
            compressor,
            block_size,
            iv_size,
            seq: 0,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Cipher block size, 0 for a stream cipher.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn mac_size(&self) -> usize {
        self.mac.output_len()
    }

    /// Explicit per-record IV length (TLS 1.1+ block ciphers).
    pub fn iv_size(&self) -> usize {
        self.iv_size
    }

    /// Sequence number the next record will use.
    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    /// Take the current sequence number and advance it.
    pub(crate) fn next_sequence(&mut self) -> Result<u64, TlsError> {
        let seq = self.seq;
        self.seq = seq
            .checked_add(1)
            .ok_or_else(|| TlsError::InternalError("record sequence number overflow".into()))?;
        Ok(seq)
    }

    /// MAC over `seq || type || [version] || length || fragment`. SSLv3
    /// omits the version.
    pub(crate) fn compute_mac(
        &self,
        seq: u64,
        content_type: ContentType,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let seq_bytes = seq.to_be_bytes();
        let type_byte = [content_type as u8];
        let version = self.version.to_bytes();
        let len = (fragment.len() as u16).to_be_bytes();
        if self.version == ProtocolVersion::SSL_V3 {
            self.mac
                .compute(&[&seq_bytes, &type_byte, &len, fragment])
        } else {
            self.mac
                .compute(&[&seq_bytes, &type_byte, &version, &len, fragment])
        }
    }

    pub(crate) fn cipher_mut(&mut self) -> &mut dyn RecordCipher {
        self.cipher.as_mut()
    }

    pub(crate) fn compressor_mut(&mut self) -> Option<&mut (dyn Compressor + 'static)> {
        self.compressor.as_deref_mut()
    }
}

impl std::fmt::Debug for ConnectionCipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCipherState")
            .field("version", &self.version)
            .field("block_size", &self.block_size)
            .field("iv_size", &self.iv_size)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
