//! The SSLv3 and TLS pseudo-random functions.
//!
//! ```text
//! P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) ||
//!                         HMAC_hash(secret, A(2) + seed) || ...
//! A(0) = seed
//! A(i) = HMAC_hash(secret, A(i-1))
//!
//! TLS 1.0/1.1: PRF = P_MD5(S1, label + seed) XOR P_SHA1(S2, label + seed)
//! TLS 1.2:     PRF = P_<suite hash>(secret, label + seed)
//! ```

use bastion_types::{HashAlgId, TlsError};

use super::ciphersuite::CipherSuiteInfo;
use super::hash;
use crate::ProtocolVersion;

/// The key derivation function selected by the negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prf {
    /// SSLv3 MD5/SHA-1 construction (labels are implicit).
    Ssl3,
    /// TLS 1.0 and 1.1 MD5 XOR SHA-1.
    Tls10,
    /// TLS 1.2 P_hash with the suite's PRF hash.
    Tls12(HashAlgId),
}

impl Prf {
    pub fn for_version(version: ProtocolVersion, suite: &CipherSuiteInfo) -> Self {
        if version == ProtocolVersion::SSL_V3 {
            Prf::Ssl3
        } else if version.supports_ciphersuite_specific_prf() {
            Prf::Tls12(suite.prf_hash())
        } else {
            Prf::Tls10
        }
    }

    /// Derive `output_len` bytes. SSLv3 ignores `label`.
    pub fn derive(
        &self,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, TlsError> {
        match *self {
            Prf::Ssl3 => ssl3_prf(secret, seed, output_len),
            Prf::Tls10 => tls10_prf(secret, label, seed, output_len),
            Prf::Tls12(h) => prf(h, secret, label, seed, output_len),
        }
    }
}

/// TLS 1.2 PRF: derive `output_len` bytes from `secret`, `label`, and `seed`.
pub fn prf(
    alg: HashAlgId,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);

    p_hash(alg, secret, &label_seed, output_len)
}

/// TLS 1.0/1.1 PRF. The secret is split into two halves that overlap by
/// one byte when its length is odd.
pub fn tls10_prf(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut out = prf(HashAlgId::Md5, s1, label, seed, output_len)?;
    let sha = prf(HashAlgId::Sha1, s2, label, seed, output_len)?;
    for (o, s) in out.iter_mut().zip(sha.iter()) {
        *o ^= s;
    }
    Ok(out)
}

/// SSLv3 key material generator:
///
/// ```text
/// MD5(secret + SHA1("A" + secret + seed)) +
/// MD5(secret + SHA1("BB" + secret + seed)) + ...
/// ```
pub fn ssl3_prf(secret: &[u8], seed: &[u8], output_len: usize) -> Result<Vec<u8>, TlsError> {
    // 26 rounds of 16 bytes is the most the letter labels allow.
    if output_len > 26 * 16 {
        return Err(TlsError::InternalError(
            "SSLv3 PRF output too long".into(),
        ));
    }
    let mut out = Vec::with_capacity(output_len + 16);
    let mut round = 0u8;
    while out.len() < output_len {
        let label = vec![b'A' + round; round as usize + 1];
        let inner = hash::digest(HashAlgId::Sha1, &[&label, secret, seed]);
        out.extend_from_slice(&hash::digest(HashAlgId::Md5, &[secret, &inner]));
        round += 1;
    }
    out.truncate(output_len);
    Ok(out)
}

/// P_hash expansion function (RFC 5246 §5).
fn p_hash(
    alg: HashAlgId,
    secret: &[u8],
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut result = Vec::with_capacity(output_len + alg.output_len());

    // A(0) = seed
    let mut a = seed.to_vec();

    while result.len() < output_len {
        a = hash::hmac(alg, secret, &[&a])?;
        let block = hash::hmac(alg, secret, &[&a, seed])?;
        result.extend_from_slice(&block);
    }

    result.truncate(output_len);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_prf_sha256_known_vector() {
        // Widely used TLS 1.2 PRF test vector (SHA-256, 100 bytes)
        let secret = hex("9bbe436ba940f017b17652849a71db35");
        let seed = hex("a0ba9f936cda311827a6f796ffd5198c");
        let out = prf(HashAlgId::Sha256, &secret, "test label", &seed, 100).unwrap();
        assert_eq!(
            to_hex(&out[..32]),
            "e3f229ba727be17b8d122620557cd453c2aab21d07c3d495329b52d4e61edb5a"
        );
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_prf_deterministic_and_length() {
        let a = prf(HashAlgId::Sha384, b"secret", "label", b"seed", 77).unwrap();
        let b = prf(HashAlgId::Sha384, b"secret", "label", b"seed", 77).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 77);
        let c = prf(HashAlgId::Sha384, b"secret", "label", b"seed", 20).unwrap();
        assert_eq!(&a[..20], &c[..]);
    }

    #[test]
    fn test_tls10_prf_is_xor_of_halves() {
        let secret = b"0123456789abcdefX";
        let out = tls10_prf(secret, "label", b"seed", 40).unwrap();
        let md5 = prf(HashAlgId::Md5, &secret[..9], "label", b"seed", 40).unwrap();
        let sha = prf(HashAlgId::Sha1, &secret[8..], "label", b"seed", 40).unwrap();
        let expected: Vec<u8> = md5.iter().zip(sha.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_ssl3_prf_first_block() {
        let secret = b"pre master";
        let seed = b"randoms";
        let out = ssl3_prf(secret, seed, 20).unwrap();
        let inner = hash::digest(HashAlgId::Sha1, &[b"A", secret, seed]);
        let first = hash::digest(HashAlgId::Md5, &[secret, &inner]);
        assert_eq!(&out[..16], &first[..]);
        assert!(ssl3_prf(secret, seed, 26 * 16 + 1).is_err());
    }

    #[test]
    fn test_prf_selection() {
        let suite = CipherSuiteInfo::by_id(crate::CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384)
            .unwrap();
        assert_eq!(Prf::for_version(ProtocolVersion::SSL_V3, suite), Prf::Ssl3);
        assert_eq!(Prf::for_version(ProtocolVersion::TLS_V11, suite), Prf::Tls10);
        assert_eq!(
            Prf::for_version(ProtocolVersion::TLS_V12, suite),
            Prf::Tls12(HashAlgId::Sha384)
        );
    }
}
