//! Inbound record pipeline: reassembly from arbitrary transport chunks,
//! decryption, constant-time padding and MAC checks, decompression.
//!
//! Padding and MAC failures are reported identically as
//! [`TlsError::BadRecordMac`], and the MAC is computed whether or not the
//! padding was well formed.

use std::sync::Arc;

use bastion_types::TlsError;
use subtle::{Choice, ConstantTimeEq, ConstantTimeLess};

use super::cipher_state::ConnectionCipherState;
use super::{
    clamp_fragment_size, ContentType, MAX_CIPHERTEXT_LENGTH, MAX_PLAINTEXT_LENGTH,
    RECORD_HEADER_LEN,
};
use crate::crypt::ciphersuite::CipherSuiteInfo;
use crate::crypt::key_schedule::SessionKeys;
use crate::crypt::registry::AlgorithmRegistry;
use crate::{ProtocolVersion, TlsRole};

/// Result of feeding bytes to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// At least this many more bytes are needed to complete a record.
    NeedMore(usize),
    /// A complete, verified record.
    Record {
        content_type: ContentType,
        payload: Vec<u8>,
    },
    /// The body of an SSLv2-format CLIENT-HELLO, starting at msg_type.
    /// Only recognized as the first record of a connection.
    Sslv2ClientHello(Vec<u8>),
}

/// Reassembles and unprotects records.
pub struct RecordReader {
    registry: Arc<AlgorithmRegistry>,
    readbuf: Vec<u8>,
    version: Option<ProtocolVersion>,
    max_fragment: usize,
    state: Option<ConnectionCipherState>,
}

impl RecordReader {
    pub fn new(registry: Arc<AlgorithmRegistry>) -> Self {
        Self {
            registry,
            readbuf: Vec::with_capacity(RECORD_HEADER_LEN),
            version: None,
            max_fragment: MAX_PLAINTEXT_LENGTH,
            state: None,
        }
    }

    /// Records must carry `version` from now on.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = Some(version);
    }

    pub fn set_maximum_fragment_size(&mut self, size: usize) {
        self.max_fragment = clamp_fragment_size(size);
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Sequence number expected on the next protected record, if active.
    pub fn sequence_number(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.sequence_number())
    }

    /// Install the keys of the peer of `side`. The sequence number restarts
    /// at 0.
    pub fn activate(
        &mut self,
        side: TlsRole,
        suite: &CipherSuiteInfo,
        keys: &SessionKeys,
        compression_method: u8,
    ) -> Result<(), TlsError> {
        let version = self.version.ok_or_else(|| {
            TlsError::InternalError("record reader activated before version set".into())
        })?;
        self.state = Some(ConnectionCipherState::new(
            &self.registry,
            side.peer(),
            suite,
            keys,
            version,
            compression_method,
        )?);
        Ok(())
    }

    /// Drop protection state, buffered input, version and fragment limit.
    pub fn reset(&mut self) {
        self.state = None;
        self.readbuf.clear();
        self.version = None;
        self.max_fragment = MAX_PLAINTEXT_LENGTH;
    }

    /// Consume bytes from `input` until one record is complete or the input
    /// runs out. Returns the outcome and the number of bytes consumed.
    pub fn read_record(&mut self, input: &[u8]) -> Result<(ReadOutcome, usize), TlsError> {
        let mut consumed = 0;

        if self.readbuf.len() < RECORD_HEADER_LEN {
            let take = (RECORD_HEADER_LEN - self.readbuf.len()).min(input.len());
            self.readbuf.extend_from_slice(&input[..take]);
            consumed += take;
            if self.readbuf.len() < RECORD_HEADER_LEN {
                return Ok((
                    ReadOutcome::NeedMore(RECORD_HEADER_LEN - self.readbuf.len()),
                    consumed,
                ));
            }
        }

        let (body_len, sslv2) = self.parse_header()?;
        // An SSLv2 header is 2 bytes; 3 of the 5 already buffered belong
        // to the body.
        let header_len = if sslv2 { 2 } else { RECORD_HEADER_LEN };
        let total = header_len + body_len;

        let rest = &input[consumed..];
        let take = (total - self.readbuf.len()).min(rest.len());
        self.readbuf.extend_from_slice(&rest[..take]);
        consumed += take;
        if self.readbuf.len() < total {
            return Ok((ReadOutcome::NeedMore(total - self.readbuf.len()), consumed));
        }

        let record = std::mem::take(&mut self.readbuf);
        if sslv2 {
            log::trace!("SSLv2 hello in: {} bytes", body_len);
            return Ok((ReadOutcome::Sslv2ClientHello(record[2..].to_vec()), consumed));
        }

        let content_type = ContentType::from_u8(record[0])?;
        let payload = self.unprotect(content_type, &record[RECORD_HEADER_LEN..])?;
        log::trace!("record in: {:?} {} bytes", content_type, payload.len());
        Ok((
            ReadOutcome::Record {
                content_type,
                payload,
            },
            consumed,
        ))
    }

    /// Validate the buffered header and return (body length, is SSLv2).
    fn parse_header(&self) -> Result<(usize, bool), TlsError> {
        let h = &self.readbuf;

        // SSLv2 CLIENT-HELLO: 2-byte length with the high bit set, then
        // msg_type 1 and a 3.x version.
        if self.state.is_none() && self.version.is_none() && h[0] & 0x80 != 0 && h[2] == 1 && h[3] >= 3 {
            let len = (u16::from_be_bytes([h[0], h[1]]) & 0x7FFF) as usize;
            if len < 3 {
                return Err(TlsError::DecodeError("SSLv2 hello too short".into()));
            }
            return Ok((len, true));
        }

        if h[1] != 3 {
            return Err(TlsError::ProtocolVersion(format!(
                "record version {}.{}",
                h[1], h[2]
            )));
        }
        if let Some(expected) = self.version {
            let got = ProtocolVersion::new(h[1], h[2]);
            if got != expected {
                return Err(TlsError::ProtocolVersion(format!(
                    "record version {got}, expected {expected}"
                )));
            }
        }

        let len = u16::from_be_bytes([h[3], h[4]]) as usize;
        if len > MAX_CIPHERTEXT_LENGTH {
            return Err(TlsError::RecordOverflow(format!("record of {len} bytes")));
        }
        Ok((len, false))
    }

    fn unprotect(&mut self, content_type: ContentType, body: &[u8]) -> Result<Vec<u8>, TlsError> {
        let Some(state) = self.state.as_mut() else {
            if body.len() > self.max_fragment {
                return Err(TlsError::RecordOverflow(format!(
                    "plaintext record of {} bytes",
                    body.len()
                )));
            }
            return Ok(body.to_vec());
        };

        let mut buf = body.to_vec();
        let mac_size = state.mac_size();
        let block_size = state.block_size();
        let iv_size = state.iv_size();

        let (plaintext, mac_ok) = if block_size > 0 {
            let min_len = (iv_size + mac_size + 1).div_ceil(block_size) * block_size;
            if buf.len() < min_len || buf.len() % block_size != 0 {
                return Err(TlsError::BadRecordMac);
            }
            state.cipher_mut().decrypt(&mut buf)?;

            let (pad_total, pad_ok) = check_padding(&buf, iv_size + mac_size, block_size, state.version());
            let content_end = buf.len() - pad_total - mac_size;
            let plaintext = buf[iv_size..content_end].to_vec();

            let seq = state.next_sequence()?;
            let expected = state.compute_mac(seq, content_type, &plaintext)?;
            let mac_ok = buf[content_end..content_end + mac_size].ct_eq(&expected) & pad_ok;
            (plaintext, mac_ok)
        } else {
            if buf.len() < mac_size {
                return Err(TlsError::BadRecordMac);
            }
            state.cipher_mut().decrypt(&mut buf)?;
            let content_end = buf.len() - mac_size;
            let plaintext = buf[..content_end].to_vec();

            let seq = state.next_sequence()?;
            let expected = state.compute_mac(seq, content_type, &plaintext)?;
            (plaintext, buf[content_end..].ct_eq(&expected))
        };

        if mac_ok.unwrap_u8() != 1 {
            return Err(TlsError::BadRecordMac);
        }

        let plaintext = match state.compressor_mut() {
            Some(c) => c.decompress(&plaintext)?,
            None => plaintext,
        };
        if plaintext.len() > self.max_fragment {
            return Err(TlsError::RecordOverflow(format!(
                "plaintext record of {} bytes",
                plaintext.len()
            )));
        }
        Ok(plaintext)
    }
}

/// Check CBC padding without branching on its contents.
///
/// Returns the padding length to strip (0 when invalid) and whether it is
/// valid. TLS requires every padding byte to equal the length byte; SSLv3
/// only requires the length to be below the block size.
fn check_padding(
    buf: &[u8],
    overhead: usize,
    block_size: usize,
    version: ProtocolVersion,
) -> (usize, Choice) {
    let len = buf.len();
    let pad_byte = buf[len - 1];
    let pad_total = pad_byte as usize + 1;

    // pad_total + overhead <= len
    let fits = !((len as u64).ct_lt(&((pad_total + overhead) as u64)));

    let mut ok = fits;
    if version == ProtocolVersion::SSL_V3 {
        ok &= (pad_total as u64).ct_lt(&(block_size as u64 + 1));
    } else {
        // Scan the maximum possible padding window; bytes beyond pad_total
        // are masked out.
        let window = len.min(256);
        for i in 1..=window {
            let in_pad = !(pad_total as u64).ct_lt(&(i as u64));
            let matches = buf[len - i].ct_eq(&pad_byte);
            ok &= !in_pad | matches;
        }
    }

    let valid = ok.unwrap_u8() == 1;
    (if valid { pad_total } else { 0 }, ok)
}

impl std::fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("buffered", &self.readbuf.len())
            .field("version", &self.version)
            .field("max_fragment", &self.max_fragment)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::random::SystemRandom;
    use crate::crypt::registry::Compressor;
    use crate::record::writer::{OutputFn, RecordWriter};
    use crate::record::DEFLATE_COMPRESSION;
    use crate::CipherSuite;
    use proptest::prelude::*;
    use std::sync::Mutex;

    struct Pipe {
        writer: RecordWriter,
        reader: RecordReader,
        wire: Arc<Mutex<Vec<u8>>>,
    }

    fn pipe(suite: Option<CipherSuite>, version: ProtocolVersion) -> Pipe {
        pipe_with(AlgorithmRegistry::with_defaults(), suite, version, 0)
    }

    fn pipe_with(
        registry: AlgorithmRegistry,
        suite: Option<CipherSuite>,
        version: ProtocolVersion,
        compression: u8,
    ) -> Pipe {
        let registry = Arc::new(registry);
        let wire = Arc::new(Mutex::new(Vec::new()));
        let sink = wire.clone();
        let out: OutputFn = Box::new(move |r: &[u8]| sink.lock().unwrap().extend_from_slice(r));
        let mut writer = RecordWriter::new(out, registry.clone(), Arc::new(SystemRandom));
        let mut reader = RecordReader::new(registry);
        writer.set_version(version);
        reader.set_version(version);
        if let Some(suite) = suite {
            let info = CipherSuiteInfo::by_id(suite).unwrap();
            let keys =
                SessionKeys::derive(version, info, &[9u8; 48], &[1u8; 32], &[2u8; 32], false)
                    .unwrap();
            writer.activate(TlsRole::Client, info, &keys, compression).unwrap();
            reader.activate(TlsRole::Server, info, &keys, compression).unwrap();
        }
        Pipe {
            writer,
            reader,
            wire,
        }
    }

    /// Drain the wire through the reader, returning every record.
    fn read_all(reader: &mut RecordReader, wire: &[u8]) -> Result<Vec<(ContentType, Vec<u8>)>, TlsError> {
        let mut out = Vec::new();
        let mut input = wire;
        while !input.is_empty() {
            let (outcome, consumed) = reader.read_record(input)?;
            input = &input[consumed..];
            if let ReadOutcome::Record {
                content_type,
                payload,
            } = outcome
            {
                out.push((content_type, payload));
            }
        }
        Ok(out)
    }

    fn join(records: Vec<(ContentType, Vec<u8>)>) -> Vec<u8> {
        records.into_iter().flat_map(|(_, p)| p).collect()
    }

    const SUITES: &[(CipherSuite, ProtocolVersion)] = &[
        (CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, ProtocolVersion::SSL_V3),
        (CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, ProtocolVersion::TLS_V10),
        (CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA, ProtocolVersion::TLS_V11),
        (CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA256, ProtocolVersion::TLS_V12),
        (CipherSuite::TLS_RSA_WITH_3DES_EDE_CBC_SHA, ProtocolVersion::TLS_V12),
        (CipherSuite::TLS_RSA_WITH_RC4_128_MD5, ProtocolVersion::SSL_V3),
        (CipherSuite::TLS_RSA_WITH_RC4_128_SHA, ProtocolVersion::TLS_V12),
        (CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384, ProtocolVersion::TLS_V12),
    ];

    #[test]
    fn test_roundtrip_every_suite_family() {
        for &(suite, version) in SUITES {
            let mut p = pipe(Some(suite), version);
            for msg in [&b"a"[..], b"hello world", &[0x5Au8; 1000]] {
                p.wire.lock().unwrap().clear();
                p.writer.send(ContentType::ApplicationData, msg).unwrap();
                let wire = p.wire.lock().unwrap().clone();
                let got = read_all(&mut p.reader, &wire).unwrap();
                assert!(got.iter().all(|(t, _)| *t == ContentType::ApplicationData));
                assert_eq!(join(got), msg, "{suite:?} {version}");
            }
            assert_eq!(p.writer.sequence_number(), p.reader.sequence_number());
        }
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let mut p = pipe(Some(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA), ProtocolVersion::TLS_V12);
        p.writer.send(ContentType::Handshake, b"fragmented delivery").unwrap();
        let wire = p.wire.lock().unwrap().clone();
        let mut got = None;
        for (i, b) in wire.iter().enumerate() {
            let (outcome, consumed) = p.reader.read_record(std::slice::from_ref(b)).unwrap();
            assert_eq!(consumed, 1);
            match outcome {
                ReadOutcome::NeedMore(n) => {
                    assert!(n >= 1);
                    assert!(i < wire.len() - 1);
                }
                ReadOutcome::Record { payload, .. } => got = Some(payload),
                ReadOutcome::Sslv2ClientHello(_) => panic!("protected record read as SSLv2"),
            }
        }
        assert_eq!(got.unwrap(), b"fragmented delivery");
    }

    #[test]
    fn test_need_more_hint() {
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        assert_eq!(reader.read_record(&[22, 3]).unwrap(), (ReadOutcome::NeedMore(3), 2));
        assert_eq!(reader.read_record(&[1, 0, 4]).unwrap(), (ReadOutcome::NeedMore(4), 3));
        let (outcome, consumed) = reader.read_record(&[1, 2, 3, 4, 0xFF]).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(
            outcome,
            ReadOutcome::Record {
                content_type: ContentType::Handshake,
                payload: vec![1, 2, 3, 4]
            }
        );
    }

    #[test]
    fn test_tampered_record_is_bad_mac() {
        for &(suite, version) in SUITES {
            let mut p = pipe(Some(suite), version);
            p.writer.send(ContentType::Handshake, b"integrity matters").unwrap();
            let mut wire = p.wire.lock().unwrap().clone();
            let last = wire.len() - 1;
            wire[last] ^= 0x01;
            assert!(matches!(
                read_all(&mut p.reader, &wire),
                Err(TlsError::BadRecordMac)
            ));
        }
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        reader.set_version(ProtocolVersion::TLS_V12);
        assert!(matches!(
            reader.read_record(&[22, 3, 1, 0, 1, 0]),
            Err(TlsError::ProtocolVersion(_))
        ));
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        assert!(matches!(
            reader.read_record(&[22, 2, 0, 0, 1, 0]),
            Err(TlsError::ProtocolVersion(_))
        ));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        let len = (MAX_CIPHERTEXT_LENGTH + 1) as u16;
        let hdr = [23, 3, 3, (len >> 8) as u8, len as u8];
        assert!(matches!(
            reader.read_record(&hdr),
            Err(TlsError::RecordOverflow(_))
        ));
    }

    #[test]
    fn test_unknown_content_type() {
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        assert!(matches!(
            reader.read_record(&[30, 3, 1, 0, 1, 0]),
            Err(TlsError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_sslv2_hello_recognized() {
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        // len 0x8009: msg_type 1, version 3.1, then 6 bytes of body
        let wire = [0x80, 0x09, 1, 3, 1, 0, 0, 0, 0, 0, 0];
        let (outcome, consumed) = reader.read_record(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(outcome, ReadOutcome::Sslv2ClientHello(wire[2..].to_vec()));
    }

    #[test]
    fn test_sslv2_hello_only_before_version() {
        let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
        reader.set_version(ProtocolVersion::TLS_V10);
        assert!(matches!(
            reader.read_record(&[0x80, 0x09, 1, 3, 1, 0, 0, 0, 0, 0, 0]),
            Err(TlsError::ProtocolVersion(_))
        ));
    }

    /// Stand-in codec for method 1: reverses the fragment and appends a
    /// marker byte. `expand` makes decompression repeat its output.
    struct Reversing {
        expand: usize,
    }

    impl Compressor for Reversing {
        fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError> {
            let mut out: Vec<u8> = data.iter().rev().copied().collect();
            out.push(0x5A);
            Ok(out)
        }

        fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError> {
            let Some((&0x5A, body)) = data.split_last() else {
                return Err(TlsError::DecodeError("missing compression marker".into()));
            };
            let plain: Vec<u8> = body.iter().rev().copied().collect();
            Ok(plain.repeat(self.expand))
        }
    }

    fn deflate_registry(expand: usize) -> AlgorithmRegistry {
        let mut registry = AlgorithmRegistry::with_defaults();
        registry.register_compressor("Deflate", Box::new(move || Box::new(Reversing { expand })));
        registry
    }

    #[test]
    fn test_compressed_roundtrip() {
        let mut p = pipe_with(
            deflate_registry(1),
            Some(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA),
            ProtocolVersion::TLS_V12,
            DEFLATE_COMPRESSION,
        );
        let msg = b"compressed application data";
        p.writer.send(ContentType::ApplicationData, msg).unwrap();
        let wire = p.wire.lock().unwrap().clone();
        // IV(16) + 28 compressed bytes + MAC(20), padded to 64.
        assert_eq!(wire.len(), RECORD_HEADER_LEN + 16 + 64);
        let got = read_all(&mut p.reader, &wire).unwrap();
        assert_eq!(join(got), msg);
    }

    #[test]
    fn test_decompressed_record_too_large() {
        let mut p = pipe_with(
            deflate_registry(3),
            Some(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA),
            ProtocolVersion::TLS_V12,
            DEFLATE_COMPRESSION,
        );
        p.reader.set_maximum_fragment_size(512);
        p.writer.send(ContentType::ApplicationData, &[0x33; 200]).unwrap();
        let wire = p.wire.lock().unwrap().clone();
        assert!(matches!(
            read_all(&mut p.reader, &wire),
            Err(TlsError::RecordOverflow(_))
        ));
    }

    #[test]
    fn test_padding_check() {
        // overhead 20, block 16: 32 bytes, last byte says 3 → 4 bytes of 3
        let mut buf = vec![0u8; 32];
        buf[28..].copy_from_slice(&[3, 3, 3, 3]);
        let (n, ok) = check_padding(&buf, 20, 16, ProtocolVersion::TLS_V12);
        assert_eq!((n, ok.unwrap_u8()), (4, 1));

        buf[29] = 7;
        let (n, ok) = check_padding(&buf, 20, 16, ProtocolVersion::TLS_V12);
        assert_eq!((n, ok.unwrap_u8()), (0, 0));

        // SSLv3 accepts arbitrary padding content.
        let (n, ok) = check_padding(&buf, 20, 16, ProtocolVersion::SSL_V3);
        assert_eq!((n, ok.unwrap_u8()), (4, 1));

        // Padding longer than the record allows.
        buf[31] = 20;
        let (_, ok) = check_padding(&buf, 20, 16, ProtocolVersion::TLS_V12);
        assert_eq!(ok.unwrap_u8(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip(payload in proptest::collection::vec(any::<u8>(), 1..3000), idx in 0usize..8) {
            let (suite, version) = SUITES[idx];
            let mut p = pipe(Some(suite), version);
            p.writer.send(ContentType::ApplicationData, &payload).unwrap();
            let wire = p.wire.lock().unwrap().clone();
            let got = read_all(&mut p.reader, &wire).unwrap();
            prop_assert_eq!(join(got), payload);
        }

        #[test]
        fn prop_fragment_boundary(limit in 128usize..2048) {
            let mut p = pipe(None, ProtocolVersion::TLS_V12);
            p.writer.set_maximum_fragment_size(limit);
            p.reader.set_maximum_fragment_size(limit);
            let payload = vec![0x11u8; limit + 1];
            p.writer.send(ContentType::ApplicationData, &payload).unwrap();
            let wire = p.wire.lock().unwrap().clone();
            let got = read_all(&mut p.reader, &wire).unwrap();
            prop_assert_eq!(got.len(), 2);
            prop_assert_eq!(got[0].1.len(), limit);
            prop_assert_eq!(got[1].1.len(), 1);
        }

        #[test]
        fn prop_bit_flip_detected(bit in 0usize..(8 * 48), idx in 0usize..8) {
            let (suite, version) = SUITES[idx];
            let mut p = pipe(Some(suite), version);
            p.writer.send(ContentType::Handshake, b"tamper-evident payload").unwrap();
            let mut wire = p.wire.lock().unwrap().clone();
            let body_bits = (wire.len() - RECORD_HEADER_LEN) * 8;
            let bit = bit % body_bits;
            wire[RECORD_HEADER_LEN + bit / 8] ^= 1 << (bit % 8);
            prop_assert!(matches!(read_all(&mut p.reader, &wire), Err(TlsError::BadRecordMac)));
        }
    }
}
