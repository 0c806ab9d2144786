//! TLS cryptographic operations.
//!
//! Bridges the record layer and handshake with the RustCrypto primitives:
//! hashes and HMAC, the PRFs, the key schedule, key exchange, and
//! signatures. Record ciphers, MACs and compressors are resolved by name
//! through [`registry::AlgorithmRegistry`].

pub mod ciphersuite;
pub mod hash;
pub mod kex;
pub mod key_schedule;
pub mod prf;
pub mod random;
pub mod registry;
pub mod signature;
pub mod transcript;

use bastion_types::HashAlgId;

use ciphersuite::SigAlgo;

/// TLS 1.2 {hash, signature} pair (RFC 5246 §7.4.1.4.1) as one code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const RSA_PKCS1_MD5: Self = Self(0x0101);
    pub const RSA_PKCS1_SHA1: Self = Self(0x0201);
    pub const RSA_PKCS1_SHA256: Self = Self(0x0401);
    pub const RSA_PKCS1_SHA384: Self = Self(0x0501);
    pub const ECDSA_SHA1: Self = Self(0x0203);
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ECDSA_SECP384R1_SHA384: Self = Self(0x0503);

    pub fn new(hash: HashAlgId, sig: SigAlgo) -> Self {
        Self(u16::from_be_bytes([hash.tls_code(), sig.tls_code()]))
    }

    pub fn hash(self) -> Option<HashAlgId> {
        HashAlgId::from_tls_code((self.0 >> 8) as u8)
    }

    pub fn sig(self) -> Option<SigAlgo> {
        SigAlgo::from_tls_code(self.0 as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_scheme_parts() {
        let s = SignatureScheme::new(HashAlgId::Sha256, SigAlgo::Rsa);
        assert_eq!(s, SignatureScheme::RSA_PKCS1_SHA256);
        assert_eq!(s.hash(), Some(HashAlgId::Sha256));
        assert_eq!(s.sig(), Some(SigAlgo::Rsa));
        assert_eq!(SignatureScheme::ECDSA_SHA1.sig(), Some(SigAlgo::Ecdsa));
        assert_eq!(SignatureScheme(0x0902).hash(), None);
    }
}
