//! Hash and HMAC helpers over the digests TLS 1.0-1.2 and SSLv3 need.

use bastion_types::{HashAlgId, TlsError};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

macro_rules! digest_parts {
    ($d:ty, $parts:expr) => {{
        let mut h = <$d>::new();
        for p in $parts {
            h.update(p);
        }
        h.finalize().to_vec()
    }};
}

macro_rules! hmac_parts {
    ($d:ty, $key:expr, $parts:expr) => {{
        let mut mac = <Hmac<$d> as Mac>::new_from_slice($key)
            .map_err(|_| TlsError::InternalError("HMAC key rejected".into()))?;
        for p in $parts {
            mac.update(p);
        }
        mac.finalize().into_bytes().to_vec()
    }};
}

/// Hash the concatenation of `parts`.
pub fn digest(alg: HashAlgId, parts: &[&[u8]]) -> Vec<u8> {
    match alg {
        HashAlgId::Md5 => digest_parts!(Md5, parts),
        HashAlgId::Sha1 => digest_parts!(Sha1, parts),
        HashAlgId::Sha256 => digest_parts!(Sha256, parts),
        HashAlgId::Sha384 => digest_parts!(Sha384, parts),
    }
}

/// HMAC over the concatenation of `parts`.
pub fn hmac(alg: HashAlgId, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
    Ok(match alg {
        HashAlgId::Md5 => hmac_parts!(Md5, key, parts),
        HashAlgId::Sha1 => hmac_parts!(Sha1, key, parts),
        HashAlgId::Sha256 => hmac_parts!(Sha256, key, parts),
        HashAlgId::Sha384 => hmac_parts!(Sha384, key, parts),
    })
}

/// SSLv3 pad length for the MAC and Finished constructions.
pub(crate) fn ssl3_pad_len(alg: HashAlgId) -> Result<usize, TlsError> {
    match alg {
        HashAlgId::Md5 => Ok(48),
        HashAlgId::Sha1 => Ok(40),
        _ => Err(TlsError::Config(format!(
            "SSLv3 construction undefined for {}",
            alg.name()
        ))),
    }
}

/// The SSLv3 keyed hash:
///
/// ```text
/// hash(secret || pad_2 || hash(secret || pad_1 || inner))
/// ```
pub(crate) fn ssl3_keyed_hash(
    alg: HashAlgId,
    secret: &[u8],
    inner: &[&[u8]],
) -> Result<Vec<u8>, TlsError> {
    let pad_len = ssl3_pad_len(alg)?;
    let pad1 = vec![0x36u8; pad_len];
    let pad2 = vec![0x5Cu8; pad_len];

    let mut first: Vec<&[u8]> = Vec::with_capacity(inner.len() + 2);
    first.push(secret);
    first.push(&pad1);
    first.extend_from_slice(inner);
    let inner_hash = digest(alg, &first);

    Ok(digest(alg, &[secret, &pad2, &inner_hash]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_digest_known_values() {
        assert_eq!(
            to_hex(&digest(HashAlgId::Md5, &[b"abc"])),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            to_hex(&digest(HashAlgId::Sha1, &[b"a", b"bc"])),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            to_hex(&digest(HashAlgId::Sha256, &[b"abc"])),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest(HashAlgId::Sha384, &[b""]).len(), 48);
    }

    #[test]
    fn test_hmac_rfc4231_case2() {
        let mac = hmac(
            HashAlgId::Sha256,
            b"Jefe",
            &[b"what do ya want ", b"for nothing?"],
        )
        .unwrap();
        assert_eq!(
            to_hex(&mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_ssl3_keyed_hash_rejects_sha256() {
        assert!(ssl3_keyed_hash(HashAlgId::Sha256, b"k", &[b"x"]).is_err());
        assert_eq!(
            ssl3_keyed_hash(HashAlgId::Sha1, b"k", &[b"x"]).unwrap().len(),
            20
        );
    }
}
