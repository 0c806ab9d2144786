//! Signing keys and signature generation/verification for
//! ServerKeyExchange and CertificateVerify.
//!
//! Before TLS 1.2 the digest is fixed by the key type (MD5 || SHA-1 for
//! RSA, SHA-1 for ECDSA); TLS 1.2 carries an explicit [`SignatureScheme`].

use bastion_types::{HashAlgId, TlsError};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::Pkcs1v15Sign;

use super::ciphersuite::SigAlgo;
use super::hash;
use super::random::{RandomSource, RngAdapter};
use super::SignatureScheme;
use crate::ProtocolVersion;

/// A private signing key held by the credentials manager.
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(rsa::RsaPrivateKey),
    Ecdsa(p256::ecdsa::SigningKey),
}

impl PrivateKey {
    /// Parse a PKCS#8 DER private key (RSA or ECDSA P-256).
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, TlsError> {
        if let Ok(k) = rsa::RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Rsa(k));
        }
        p256::ecdsa::SigningKey::from_pkcs8_der(der)
            .map(PrivateKey::Ecdsa)
            .map_err(|_| TlsError::Config("unsupported private key".into()))
    }

    pub fn algo(&self) -> SigAlgo {
        match self {
            PrivateKey::Rsa(_) => SigAlgo::Rsa,
            PrivateKey::Ecdsa(_) => SigAlgo::Ecdsa,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(k) => PublicKey::Rsa(k.to_public_key()),
            PrivateKey::Ecdsa(k) => PublicKey::Ecdsa(p256::ecdsa::VerifyingKey::from(k)),
        }
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.algo().name())
    }
}

/// A public key extracted from a peer certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(rsa::RsaPublicKey),
    Ecdsa(p256::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Parse a DER SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, TlsError> {
        if let Ok(k) = rsa::RsaPublicKey::from_public_key_der(der) {
            return Ok(PublicKey::Rsa(k));
        }
        p256::ecdsa::VerifyingKey::from_public_key_der(der)
            .map(PublicKey::Ecdsa)
            .map_err(|_| TlsError::BadCertificate("unsupported public key".into()))
    }

    /// Encode as DER SubjectPublicKeyInfo.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, TlsError> {
        let doc = match self {
            PublicKey::Rsa(k) => k.to_public_key_der(),
            PublicKey::Ecdsa(k) => k.to_public_key_der(),
        };
        doc.map(|d| d.as_bytes().to_vec())
            .map_err(|_| TlsError::InternalError("public key encoding failed".into()))
    }

    pub fn algo(&self) -> SigAlgo {
        match self {
            PublicKey::Rsa(_) => SigAlgo::Rsa,
            PublicKey::Ecdsa(_) => SigAlgo::Ecdsa,
        }
    }
}

/// The digest construction fed to the signature primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureHash {
    /// MD5 || SHA-1, signed without a DigestInfo prefix.
    Md5Sha1,
    Single(HashAlgId),
}

impl SignatureHash {
    /// Select the digest for `sig` in `version`. TLS 1.2 requires a scheme
    /// whose signature half matches the key.
    pub fn select(
        version: ProtocolVersion,
        sig: SigAlgo,
        scheme: Option<SignatureScheme>,
    ) -> Result<Self, TlsError> {
        if version.supports_negotiable_signature_algorithms() {
            let scheme = scheme.ok_or_else(|| {
                TlsError::DecodeError("missing signature algorithm".into())
            })?;
            if scheme.sig() != Some(sig) {
                return Err(TlsError::IllegalParameter(
                    "signature algorithm does not match key".into(),
                ));
            }
            let h = scheme.hash().ok_or_else(|| {
                TlsError::IllegalParameter(format!("unknown hash in scheme {:#06x}", scheme.0))
            })?;
            return Ok(SignatureHash::Single(h));
        }
        Ok(match sig {
            SigAlgo::Rsa => SignatureHash::Md5Sha1,
            SigAlgo::Ecdsa => SignatureHash::Single(HashAlgId::Sha1),
        })
    }

    pub fn digest(self, message: &[u8]) -> Vec<u8> {
        match self {
            SignatureHash::Md5Sha1 => {
                let mut out = hash::digest(HashAlgId::Md5, &[message]);
                out.extend_from_slice(&hash::digest(HashAlgId::Sha1, &[message]));
                out
            }
            SignatureHash::Single(h) => hash::digest(h, &[message]),
        }
    }

    fn rsa_padding(self) -> Pkcs1v15Sign {
        match self {
            SignatureHash::Md5Sha1 => Pkcs1v15Sign::new_unprefixed(),
            SignatureHash::Single(HashAlgId::Md5) => Pkcs1v15Sign::new::<md5::Md5>(),
            SignatureHash::Single(HashAlgId::Sha1) => Pkcs1v15Sign::new::<sha1::Sha1>(),
            SignatureHash::Single(HashAlgId::Sha256) => Pkcs1v15Sign::new::<sha2::Sha256>(),
            SignatureHash::Single(HashAlgId::Sha384) => Pkcs1v15Sign::new::<sha2::Sha384>(),
        }
    }
}

/// Pick the TLS 1.2 scheme for a key: the first policy hash the peer also
/// offered. A peer that sent no list gets SHA-1 (RFC 5246 §7.4.1.4.1).
pub fn choose_scheme(
    sig: SigAlgo,
    policy_hashes: &[HashAlgId],
    peer_offered: &[SignatureScheme],
) -> Option<SignatureScheme> {
    if peer_offered.is_empty() {
        return Some(SignatureScheme::new(HashAlgId::Sha1, sig));
    }
    policy_hashes
        .iter()
        .map(|h| SignatureScheme::new(*h, sig))
        .find(|s| peer_offered.contains(s))
}

/// Sign an already computed digest.
pub fn sign_digest(
    key: &PrivateKey,
    hash: SignatureHash,
    digest: &[u8],
    rng: &dyn RandomSource,
) -> Result<Vec<u8>, TlsError> {
    match key {
        PrivateKey::Rsa(k) => {
            let mut adapter = RngAdapter::new(rng);
            let sig = k
                .sign_with_rng(&mut adapter, hash.rsa_padding(), digest)
                .map_err(|_| TlsError::CryptoError(bastion_types::CryptoError::RsaSignFail));
            adapter.finish()?;
            sig
        }
        PrivateKey::Ecdsa(k) => {
            let prehash = ecdsa_prehash(hash, digest);
            let sig: p256::ecdsa::Signature = k
                .sign_prehash(prehash)
                .map_err(|_| TlsError::CryptoError(bastion_types::CryptoError::EcdsaSignFail))?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
    }
}

/// Verify a signature over an already computed digest.
pub fn verify_digest(
    key: &PublicKey,
    hash: SignatureHash,
    digest: &[u8],
    signature: &[u8],
) -> bool {
    match key {
        PublicKey::Rsa(k) => k.verify(hash.rsa_padding(), digest, signature).is_ok(),
        PublicKey::Ecdsa(k) => match p256::ecdsa::Signature::from_der(signature) {
            Ok(sig) => k.verify_prehash(ecdsa_prehash(hash, digest), &sig).is_ok(),
            Err(_) => false,
        },
    }
}

/// Sign `message` for `version`.
pub fn sign_message(
    key: &PrivateKey,
    version: ProtocolVersion,
    scheme: Option<SignatureScheme>,
    message: &[u8],
    rng: &dyn RandomSource,
) -> Result<Vec<u8>, TlsError> {
    let hash = SignatureHash::select(version, key.algo(), scheme)?;
    sign_digest(key, hash, &hash.digest(message), rng)
}

/// Verify `signature` over `message` for `version`.
pub fn verify_message(
    key: &PublicKey,
    version: ProtocolVersion,
    scheme: Option<SignatureScheme>,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, TlsError> {
    let hash = SignatureHash::select(version, key.algo(), scheme)?;
    Ok(verify_digest(key, hash, &hash.digest(message), signature))
}

/// ECDSA signs the SHA-1 half when handed an MD5 || SHA-1 digest.
fn ecdsa_prehash(hash: SignatureHash, digest: &[u8]) -> &[u8] {
    match hash {
        SignatureHash::Md5Sha1 if digest.len() == 36 => &digest[16..],
        _ => digest,
    }
}
