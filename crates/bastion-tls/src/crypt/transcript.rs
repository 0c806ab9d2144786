//! Handshake transcript for Finished and CertificateVerify.
//!
//! Buffers every handshake message in order; the digest is computed on
//! demand, once the negotiated version picks the hash construction.

use bastion_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

use super::hash;
use crate::ProtocolVersion;

/// Sender label for the SSLv3 client Finished.
pub const SSL3_CLIENT_SENDER: &[u8] = b"CLNT";
/// Sender label for the SSLv3 server Finished.
pub const SSL3_SERVER_SENDER: &[u8] = b"SRVR";

/// Running transcript over handshake messages.
///
/// Uses a message buffer + replay approach: every digest is computed by a
/// fresh hasher over the buffered data, so `update()` keeps working after
/// an intermediate hash has been taken.
#[derive(Default, Clone)]
pub struct TranscriptHash {
    message_buffer: Vec<u8>,
}

impl TranscriptHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handshake message, re-framing it with its 4-byte header.
    pub fn update(&mut self, msg_type: u8, contents: &[u8]) {
        let len = contents.len() as u32;
        self.message_buffer.push(msg_type);
        self.message_buffer.extend_from_slice(&len.to_be_bytes()[1..]);
        self.message_buffer.extend_from_slice(contents);
    }

    /// Append bytes verbatim (the SSLv2 compatible ClientHello).
    pub fn update_raw(&mut self, data: &[u8]) {
        self.message_buffer.extend_from_slice(data);
    }

    pub fn contents(&self) -> &[u8] {
        &self.message_buffer
    }

    pub fn reset(&mut self) {
        self.message_buffer.zeroize();
        self.message_buffer.clear();
    }

    /// Digest of the transcript with a single algorithm.
    pub fn hash_with(&self, alg: HashAlgId) -> Vec<u8> {
        hash::digest(alg, &[&self.message_buffer])
    }

    /// Transcript digest for TLS Finished: the PRF hash in TLS 1.2,
    /// MD5 || SHA-1 before.
    pub fn final_hash(&self, version: ProtocolVersion, prf_hash: HashAlgId) -> Vec<u8> {
        if version.supports_ciphersuite_specific_prf() {
            self.hash_with(prf_hash)
        } else {
            let mut out = self.hash_with(HashAlgId::Md5);
            out.extend_from_slice(&self.hash_with(HashAlgId::Sha1));
            out
        }
    }

    /// SSLv3 MD5 || SHA-1 transcript digest keyed with the master secret.
    ///
    /// ```text
    /// hash(master || pad_2 || hash(messages || sender || master || pad_1))
    /// ```
    ///
    /// `sender` is empty for CertificateVerify.
    pub fn final_ssl3(&self, master_secret: &[u8], sender: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::with_capacity(36);
        for alg in [HashAlgId::Md5, HashAlgId::Sha1] {
            let pad_len = hash::ssl3_pad_len(alg)?;
            let pad1 = vec![0x36u8; pad_len];
            let pad2 = vec![0x5Cu8; pad_len];
            let inner = hash::digest(
                alg,
                &[&self.message_buffer, sender, master_secret, &pad1],
            );
            out.extend_from_slice(&hash::digest(alg, &[master_secret, &pad2, &inner]));
        }
        Ok(out)
    }
}

impl std::fmt::Debug for TranscriptHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptHash")
            .field("len", &self.message_buffer.len())
            .finish()
    }
}

impl Drop for TranscriptHash {
    fn drop(&mut self) {
        self.message_buffer.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_frames_message() {
        let mut th = TranscriptHash::new();
        th.update(1, &[0xAA, 0xBB]);
        assert_eq!(th.contents(), &[1, 0, 0, 2, 0xAA, 0xBB]);
        th.update_raw(&[9]);
        assert_eq!(th.contents().len(), 7);
    }

    #[test]
    fn test_final_hash_by_version() {
        let mut th = TranscriptHash::new();
        th.update(1, b"hello");
        let old = th.final_hash(ProtocolVersion::TLS_V10, HashAlgId::Sha256);
        assert_eq!(old.len(), 36);
        assert_eq!(&old[..16], &hash::digest(HashAlgId::Md5, &[th.contents()])[..]);

        let new = th.final_hash(ProtocolVersion::TLS_V12, HashAlgId::Sha384);
        assert_eq!(new.len(), 48);
    }

    #[test]
    fn test_intermediate_hash_nondestructive() {
        let mut th = TranscriptHash::new();
        th.update(1, b"a");
        let h1 = th.hash_with(HashAlgId::Sha256);
        assert_eq!(h1, th.hash_with(HashAlgId::Sha256));
        th.update(2, b"b");
        assert_ne!(h1, th.hash_with(HashAlgId::Sha256));
    }

    #[test]
    fn test_ssl3_senders_differ() {
        let mut th = TranscriptHash::new();
        th.update(1, b"hello");
        let c = th.final_ssl3(&[7u8; 48], SSL3_CLIENT_SENDER).unwrap();
        let s = th.final_ssl3(&[7u8; 48], SSL3_SERVER_SENDER).unwrap();
        assert_eq!(c.len(), 36);
        assert_ne!(c, s);
    }

    #[test]
    fn test_reset_clears() {
        let mut th = TranscriptHash::new();
        th.update(1, b"x");
        th.reset();
        assert!(th.contents().is_empty());
    }
}
