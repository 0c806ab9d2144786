//! Key exchange primitives for TLS 1.0-1.2: finite-field DH, ECDH
//! (SECP256R1, X25519), the PSK pre-master construction, and SRP-6a.

use bastion_types::{CryptoError, EccCurveId, TlsError};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::BigUint;
use subtle::{ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroize;

use super::hash;
use super::random::{RandomSource, RngAdapter};
use crate::ProtocolVersion;
use bastion_types::HashAlgId;

/// RFC 3526 2048-bit MODP group (group 14), generator 2.
const MODP_2048_P: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// Smallest peer-supplied DH modulus accepted.
pub const MIN_DH_GROUP_BITS: usize = 1024;
/// Largest peer-supplied DH modulus accepted.
pub const MAX_DH_GROUP_BITS: usize = 8192;

/// Private exponent length drawn for DH and SRP.
const EXPONENT_LEN: usize = 32;

fn decode_hex(s: &str) -> Vec<u8> {
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digit = |c: u8| match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                _ => c - b'A' + 10,
            };
            (digit(pair[0]) << 4) | digit(pair[1])
        })
        .collect()
}

fn zero() -> BigUint {
    BigUint::from(0u8)
}

fn one() -> BigUint {
    BigUint::from(1u8)
}

/// Left-pad a big-endian integer to `len` bytes.
fn pad_to(bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes;
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

// ---------------------------------------------------------------------------
// Finite-field Diffie-Hellman
// ---------------------------------------------------------------------------

/// A finite-field group: prime modulus and generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    p: BigUint,
    g: BigUint,
}

impl DhGroup {
    /// The fixed group used for DHE and SRP by this engine.
    pub fn modp_2048() -> Self {
        Self {
            p: BigUint::from_bytes_be(&decode_hex(MODP_2048_P)),
            g: BigUint::from(2u8),
        }
    }

    /// Group parameters received from the peer.
    pub fn from_params(p: &[u8], g: &[u8]) -> Result<Self, TlsError> {
        let p = BigUint::from_bytes_be(p);
        let g = BigUint::from_bytes_be(g);
        if p.bits() < MIN_DH_GROUP_BITS {
            return Err(TlsError::IllegalParameter(format!(
                "DH group too small: {} bits",
                p.bits()
            )));
        }
        if p.bits() > MAX_DH_GROUP_BITS {
            return Err(TlsError::IllegalParameter(format!(
                "DH group too large: {} bits",
                p.bits()
            )));
        }
        if g <= one() || g >= p {
            return Err(TlsError::IllegalParameter("invalid DH generator".into()));
        }
        Ok(Self { p, g })
    }

    pub fn p_bytes(&self) -> Vec<u8> {
        self.p.to_bytes_be()
    }

    pub fn g_bytes(&self) -> Vec<u8> {
        self.g.to_bytes_be()
    }

    fn byte_len(&self) -> usize {
        self.p.bits().div_ceil(8)
    }

    /// Reject 0, 1, p-1 and anything not reduced modulo p.
    fn check_element(&self, y: &BigUint) -> Result<(), TlsError> {
        let p_minus_1 = &self.p - &one();
        if *y <= one() || *y >= p_minus_1 {
            return Err(TlsError::IllegalParameter(
                "DH public value out of range".into(),
            ));
        }
        Ok(())
    }
}

/// Ephemeral DH key pair.
pub struct DhKeyExchange {
    group: DhGroup,
    private: Vec<u8>,
    public_key_bytes: Vec<u8>,
}

impl DhKeyExchange {
    pub fn generate(group: DhGroup, rng: &dyn RandomSource) -> Result<Self, TlsError> {
        let private = rng.random_vec(EXPONENT_LEN)?;
        let x = BigUint::from_bytes_be(&private);
        let public = group.g.modpow(&x, &group.p);
        Ok(Self {
            public_key_bytes: public.to_bytes_be(),
            group,
            private,
        })
    }

    pub fn group(&self) -> &DhGroup {
        &self.group
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Shared secret with leading zero bytes stripped (RFC 5246 §8.1.2).
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        let y = BigUint::from_bytes_be(peer_public);
        self.group.check_element(&y)?;
        let x = BigUint::from_bytes_be(&self.private);
        Ok(y.modpow(&x, &self.group.p).to_bytes_be())
    }
}

impl Drop for DhKeyExchange {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

// ---------------------------------------------------------------------------
// Elliptic curve Diffie-Hellman
// ---------------------------------------------------------------------------

enum EcdhInner {
    X25519(x25519_dalek::StaticSecret),
    P256(p256::ecdh::EphemeralSecret),
}

/// Ephemeral ECDH key pair on a named curve.
pub struct EcdhKeyExchange {
    curve: EccCurveId,
    inner: EcdhInner,
    public_key_bytes: Vec<u8>,
}

impl EcdhKeyExchange {
    pub fn generate(curve: EccCurveId, rng: &dyn RandomSource) -> Result<Self, TlsError> {
        match curve {
            EccCurveId::X25519 => {
                let mut seed = [0u8; 32];
                rng.fill(&mut seed)?;
                let secret = x25519_dalek::StaticSecret::from(seed);
                seed.zeroize();
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(Self {
                    curve,
                    public_key_bytes: public.as_bytes().to_vec(),
                    inner: EcdhInner::X25519(secret),
                })
            }
            EccCurveId::Secp256r1 => {
                let mut adapter = RngAdapter::new(rng);
                let secret = p256::ecdh::EphemeralSecret::random(&mut adapter);
                adapter.finish()?;
                let public_key_bytes = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(Self {
                    curve,
                    inner: EcdhInner::P256(secret),
                    public_key_bytes,
                })
            }
        }
    }

    pub fn curve(&self) -> EccCurveId {
        self.curve
    }

    /// Uncompressed point (P-256) or u-coordinate (X25519).
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        match &self.inner {
            EcdhInner::X25519(secret) => {
                let bytes: [u8; 32] = peer_public.try_into().map_err(|_| {
                    TlsError::IllegalParameter("bad X25519 public key length".into())
                })?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
                if !shared.was_contributory() {
                    return Err(TlsError::IllegalParameter(
                        "X25519 shared secret is all zero".into(),
                    ));
                }
                Ok(shared.as_bytes().to_vec())
            }
            EcdhInner::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
                    TlsError::IllegalParameter("invalid SECP256R1 point".into())
                })?;
                let shared = secret.diffie_hellman(&peer);
                Ok(shared.raw_secret_bytes().to_vec())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RSA key transport
// ---------------------------------------------------------------------------

/// Length of an RSA-transported pre-master secret.
pub const RSA_PREMASTER_LEN: usize = 48;

/// Client side: `client_version || 46 random bytes`, PKCS#1 v1.5 encrypted.
/// Returns `(pre_master_secret, ciphertext)`.
pub fn rsa_encrypt_premaster(
    key: &rsa::RsaPublicKey,
    client_version: ProtocolVersion,
    rng: &dyn RandomSource,
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let mut pms = rng.random_vec(RSA_PREMASTER_LEN)?;
    pms[..2].copy_from_slice(&client_version.to_bytes());
    let mut adapter = RngAdapter::new(rng);
    let ct = key
        .encrypt(&mut adapter, rsa::Pkcs1v15Encrypt, &pms)
        .map_err(|_| TlsError::CryptoError(CryptoError::RsaEncryptFail));
    adapter.finish()?;
    Ok((pms, ct?))
}

/// Server side. A decryption failure, a wrong length, or a version
/// mismatch silently yields a random pre-master secret so the handshake
/// fails later at Finished (RFC 5246 §7.4.7.1).
pub fn rsa_decrypt_premaster(
    key: &rsa::RsaPrivateKey,
    ciphertext: &[u8],
    client_version: ProtocolVersion,
    rng: &dyn RandomSource,
) -> Result<Vec<u8>, TlsError> {
    let mut fallback = rng.random_vec(RSA_PREMASTER_LEN)?;
    fallback[..2].copy_from_slice(&client_version.to_bytes());

    let mut adapter = RngAdapter::new(rng);
    let decrypted = key.decrypt_blinded(&mut adapter, rsa::Pkcs1v15Encrypt, ciphertext);
    adapter.finish()?;

    let candidate = match decrypted {
        Ok(d) if d.len() == RSA_PREMASTER_LEN => d,
        _ => return Ok(fallback),
    };
    let version_ok = candidate[..2].ct_eq(&client_version.to_bytes());
    let out = candidate
        .iter()
        .zip(fallback.iter())
        .map(|(c, f)| u8::conditional_select(f, c, version_ok))
        .collect();
    Ok(out)
}

// ---------------------------------------------------------------------------
// PSK
// ---------------------------------------------------------------------------

/// PSK pre-master secret (RFC 4279 §2):
///
/// ```text
/// uint16 len(other_secret) || other_secret || uint16 len(psk) || psk
/// ```
///
/// Plain PSK passes `None`, which uses `len(psk)` zero bytes.
pub fn psk_premaster_secret(other_secret: Option<&[u8]>, psk: &[u8]) -> Vec<u8> {
    let zeros;
    let other = match other_secret {
        Some(o) => o,
        None => {
            zeros = vec![0u8; psk.len()];
            &zeros
        }
    };
    let mut out = Vec::with_capacity(4 + other.len() + psk.len());
    out.extend_from_slice(&(other.len() as u16).to_be_bytes());
    out.extend_from_slice(other);
    out.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    out.extend_from_slice(psk);
    out
}

// ---------------------------------------------------------------------------
// SRP-6a (RFC 5054)
// ---------------------------------------------------------------------------

fn srp_k(group: &DhGroup) -> BigUint {
    let n_len = group.byte_len();
    let n = pad_to(group.p_bytes(), n_len);
    let g = pad_to(group.g_bytes(), n_len);
    BigUint::from_bytes_be(&hash::digest(HashAlgId::Sha1, &[&n, &g]))
}

fn srp_u(group: &DhGroup, a: &BigUint, b: &BigUint) -> BigUint {
    let n_len = group.byte_len();
    let a = pad_to(a.to_bytes_be(), n_len);
    let b = pad_to(b.to_bytes_be(), n_len);
    BigUint::from_bytes_be(&hash::digest(HashAlgId::Sha1, &[&a, &b]))
}

/// x = SHA1(s | SHA1(I | ":" | P))
fn srp_x(identifier: &str, password: &str, salt: &[u8]) -> BigUint {
    let inner = hash::digest(
        HashAlgId::Sha1,
        &[identifier.as_bytes(), b":", password.as_bytes()],
    );
    BigUint::from_bytes_be(&hash::digest(HashAlgId::Sha1, &[salt, &inner]))
}

/// The password verifier `v = g^x mod N` stored by the server.
pub fn srp6_generate_verifier(
    identifier: &str,
    password: &str,
    salt: &[u8],
    group: &DhGroup,
) -> Vec<u8> {
    let x = srp_x(identifier, password, salt);
    group.g.modpow(&x, &group.p).to_bytes_be()
}

/// Server half of an SRP-6a exchange.
pub struct SrpServerSession {
    group: DhGroup,
    v: BigUint,
    b: Vec<u8>,
    public_b: BigUint,
}

impl SrpServerSession {
    /// B = (k*v + g^b) % N
    pub fn new(group: DhGroup, verifier: &[u8], rng: &dyn RandomSource) -> Result<Self, TlsError> {
        let b = rng.random_vec(EXPONENT_LEN)?;
        let v = BigUint::from_bytes_be(verifier);
        let k = srp_k(&group);
        let gb = group.g.modpow(&BigUint::from_bytes_be(&b), &group.p);
        let kv = &k * &v;
        let public_b = &(&kv + &gb) % &group.p;
        Ok(Self {
            group,
            v,
            b,
            public_b,
        })
    }

    pub fn group(&self) -> &DhGroup {
        &self.group
    }

    pub fn public_b(&self) -> Vec<u8> {
        self.public_b.to_bytes_be()
    }

    /// S = (A * v^u) ^ b % N, padded to the length of N.
    pub fn compute_shared_secret(&self, client_a: &[u8]) -> Result<Vec<u8>, TlsError> {
        let p = &self.group.p;
        let a = BigUint::from_bytes_be(client_a);
        if &a % p == zero() {
            return Err(TlsError::IllegalParameter("invalid SRP A value".into()));
        }
        let u = srp_u(&self.group, &a, &self.public_b);
        let vu = self.v.modpow(&u, p);
        let base = &(&a * &vu) % p;
        let s = base.modpow(&BigUint::from_bytes_be(&self.b), p);
        Ok(pad_to(s.to_bytes_be(), self.group.byte_len()))
    }
}

impl Drop for SrpServerSession {
    fn drop(&mut self) {
        self.b.zeroize();
    }
}

/// Client half of an SRP-6a exchange. Returns `(A, premaster secret)`.
///
/// ```text
/// A = g^a % N
/// S = (B - (k * g^x)) ^ (a + (u * x)) % N
/// ```
pub fn srp6_client_agree(
    identifier: &str,
    password: &str,
    group: &DhGroup,
    salt: &[u8],
    server_b: &[u8],
    rng: &dyn RandomSource,
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let p = &group.p;
    let b = BigUint::from_bytes_be(server_b);
    if &b % p == zero() {
        return Err(TlsError::IllegalParameter("invalid SRP B value".into()));
    }
    let b = &b % p;

    let mut a_secret = rng.random_vec(EXPONENT_LEN)?;
    let a_exp = BigUint::from_bytes_be(&a_secret);
    a_secret.zeroize();
    let a = group.g.modpow(&a_exp, p);

    let u = srp_u(group, &a, &b);
    if u == zero() {
        return Err(TlsError::IllegalParameter("SRP u value is zero".into()));
    }
    let k = srp_k(group);
    let x = srp_x(identifier, password, salt);

    let gx = group.g.modpow(&x, p);
    let kgx = &(&k * &gx) % p;
    let base = &(&(&b + p) - &kgx) % p;
    let ux = &u * &x;
    let exp = &a_exp + &ux;
    let s = base.modpow(&exp, p);

    Ok((a.to_bytes_be(), pad_to(s.to_bytes_be(), group.byte_len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::random::SystemRandom;

    #[test]
    fn test_modp_2048_size() {
        let g = DhGroup::modp_2048();
        assert_eq!(g.p_bytes().len(), 256);
        assert_eq!(g.g_bytes(), vec![2]);
        assert_eq!(g.p_bytes()[0], 0xFF);
    }

    #[test]
    fn test_dh_agreement() {
        let rng = SystemRandom;
        let a = DhKeyExchange::generate(DhGroup::modp_2048(), &rng).unwrap();
        let b = DhKeyExchange::generate(DhGroup::modp_2048(), &rng).unwrap();
        let s1 = a.compute_shared_secret(b.public_key_bytes()).unwrap();
        let s2 = b.compute_shared_secret(a.public_key_bytes()).unwrap();
        assert_eq!(s1, s2);
        assert!(a.compute_shared_secret(&[1]).is_err());
    }

    #[test]
    fn test_dh_rejects_small_group() {
        assert!(DhGroup::from_params(&[0xFF; 64], &[2]).is_err());
        let g = DhGroup::modp_2048();
        assert!(DhGroup::from_params(&g.p_bytes(), &g.g_bytes()).is_ok());
        assert!(DhGroup::from_params(&g.p_bytes(), &[1]).is_err());
    }

    #[test]
    fn test_dh_rejects_oversized_group() {
        let mut p = vec![0xFF; MAX_DH_GROUP_BITS / 8];
        assert!(DhGroup::from_params(&p, &[2]).is_ok());
        p.push(0xFF);
        assert!(matches!(
            DhGroup::from_params(&p, &[2]),
            Err(TlsError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_ecdh_x25519() {
        let rng = SystemRandom;
        let kx = EcdhKeyExchange::generate(EccCurveId::X25519, &rng).unwrap();
        let peer = EcdhKeyExchange::generate(EccCurveId::X25519, &rng).unwrap();
        assert_eq!(kx.public_key_bytes().len(), 32);
        let s1 = kx.compute_shared_secret(peer.public_key_bytes()).unwrap();
        let s2 = peer.compute_shared_secret(kx.public_key_bytes()).unwrap();
        assert_eq!(s1, s2);
        assert!(kx.compute_shared_secret(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_ecdh_secp256r1() {
        let rng = SystemRandom;
        let kx = EcdhKeyExchange::generate(EccCurveId::Secp256r1, &rng).unwrap();
        // uncompressed point: 0x04 || x(32) || y(32)
        assert_eq!(kx.public_key_bytes().len(), 65);
        let peer = EcdhKeyExchange::generate(EccCurveId::Secp256r1, &rng).unwrap();
        let s1 = kx.compute_shared_secret(peer.public_key_bytes()).unwrap();
        let s2 = peer.compute_shared_secret(kx.public_key_bytes()).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 32);
        assert!(kx.compute_shared_secret(&[4u8; 65]).is_err());
    }

    #[test]
    fn test_psk_premaster_layout() {
        let pms = psk_premaster_secret(None, &[0xAB, 0xCD]);
        assert_eq!(pms, vec![0, 2, 0, 0, 0, 2, 0xAB, 0xCD]);
        let pms = psk_premaster_secret(Some(&[7]), &[0xAB]);
        assert_eq!(pms, vec![0, 1, 7, 0, 1, 0xAB]);
    }

    #[test]
    fn test_srp_agreement() {
        let rng = SystemRandom;
        let group = DhGroup::modp_2048();
        let salt = b"saltsalt";
        let v = srp6_generate_verifier("alice", "password123", salt, &group);
        let server = SrpServerSession::new(group.clone(), &v, &rng).unwrap();

        let (a, client_pms) =
            srp6_client_agree("alice", "password123", &group, salt, &server.public_b(), &rng)
                .unwrap();
        let server_pms = server.compute_shared_secret(&a).unwrap();
        assert_eq!(client_pms, server_pms);

        let (a, wrong) =
            srp6_client_agree("alice", "wrong", &group, salt, &server.public_b(), &rng).unwrap();
        assert_ne!(wrong, server.compute_shared_secret(&a).unwrap());
        assert!(server.compute_shared_secret(&group.p_bytes()).is_err());
    }

    #[test]
    fn test_rsa_premaster_transport() {
        let rng = SystemRandom;
        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let public = key.to_public_key();
        let (pms, ct) =
            rsa_encrypt_premaster(&public, ProtocolVersion::TLS_V12, &rng).unwrap();
        assert_eq!(&pms[..2], &[3, 3]);
        let got = rsa_decrypt_premaster(&key, &ct, ProtocolVersion::TLS_V12, &rng).unwrap();
        assert_eq!(got, pms);

        // Version rollback and garbage both yield an unrelated secret.
        let got = rsa_decrypt_premaster(&key, &ct, ProtocolVersion::TLS_V10, &rng).unwrap();
        assert_ne!(got, pms);
        assert_eq!(&got[..2], &[3, 1]);
        let got = rsa_decrypt_premaster(&key, &[1u8; 128], ProtocolVersion::TLS_V12, &rng).unwrap();
        assert_eq!(got.len(), RSA_PREMASTER_LEN);
    }
}
