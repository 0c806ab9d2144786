//! Algorithm registry: resolves canonical algorithm names to record
//! protection primitives.
//!
//! The registry is an explicit object owned by the application and shared
//! with the record layer and the handshake. Names follow the
//! `"<cipher>/<mode>/<padding>"` and `"<mac>(<hash>)"` conventions, e.g.
//! `"AES-128/CBC/NoPadding"`, `"HMAC(SHA-256)"`, `"SSL3-MAC(SHA-1)"`.

use std::collections::HashMap;
use std::fmt;

use aes::{Aes128, Aes256};
use bastion_types::{CryptoError, HashAlgId, TlsError};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit, StreamCipher};
use des::TdesEde3;
use rc4::consts::U16;
use rc4::Rc4;
use zeroize::Zeroize;

use super::hash;

/// A bulk cipher bound to one direction of a connection.
///
/// Block ciphers keep their CBC chaining value across records; stream
/// ciphers keep their keystream position.
pub trait RecordCipher: Send {
    /// Block size in bytes, or `None` for a stream cipher.
    fn block_size(&self) -> Option<usize>;
    /// Encrypt in place. Block ciphers require block-aligned input.
    fn encrypt(&mut self, data: &mut [u8]) -> Result<(), TlsError>;
    /// Decrypt in place. Block ciphers require block-aligned input.
    fn decrypt(&mut self, data: &mut [u8]) -> Result<(), TlsError>;
}

/// A keyed record MAC.
pub trait RecordMac: Send {
    fn output_len(&self) -> usize;
    /// MAC over the concatenation of `parts`.
    fn compute(&self, parts: &[&[u8]]) -> Result<Vec<u8>, TlsError>;
}

/// A record compression codec.
pub trait Compressor: Send {
    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError>;
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError>;
}

/// Constructor for a cipher from (key, iv).
pub type CipherCtor =
    Box<dyn Fn(&[u8], &[u8]) -> Result<Box<dyn RecordCipher>, TlsError> + Send + Sync>;
/// Constructor for a MAC from its key.
pub type MacCtor = Box<dyn Fn(&[u8]) -> Result<Box<dyn RecordMac>, TlsError> + Send + Sync>;
/// Constructor for a compression codec.
pub type CompressorCtor = Box<dyn Fn() -> Box<dyn Compressor> + Send + Sync>;

/// Name-keyed table of record primitives.
pub struct AlgorithmRegistry {
    ciphers: HashMap<String, CipherCtor>,
    macs: HashMap<String, MacCtor>,
    compressors: HashMap<String, CompressorCtor>,
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ciphers: Vec<_> = self.ciphers.keys().collect();
        ciphers.sort();
        let mut macs: Vec<_> = self.macs.keys().collect();
        macs.sort();
        f.debug_struct("AlgorithmRegistry")
            .field("ciphers", &ciphers)
            .field("macs", &macs)
            .field("compressors", &self.compressors.len())
            .finish()
    }
}

impl AlgorithmRegistry {
    /// A registry with no algorithms at all.
    pub fn empty() -> Self {
        Self {
            ciphers: HashMap::new(),
            macs: HashMap::new(),
            compressors: HashMap::new(),
        }
    }

    /// A registry with every built-in cipher and MAC.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();

        reg.register_cipher(
            "AES-128/CBC/NoPadding",
            Box::new(|key, iv| Ok(Box::new(CbcCipher::<Aes128>::new(key, iv)?))),
        );
        reg.register_cipher(
            "AES-256/CBC/NoPadding",
            Box::new(|key, iv| Ok(Box::new(CbcCipher::<Aes256>::new(key, iv)?))),
        );
        reg.register_cipher(
            "TripleDES/CBC/NoPadding",
            Box::new(|key, iv| Ok(Box::new(CbcCipher::<TdesEde3>::new(key, iv)?))),
        );
        reg.register_cipher(
            "ARC4",
            Box::new(|key, _iv| Ok(Box::new(Rc4Cipher::new(key)?))),
        );

        for h in [
            HashAlgId::Md5,
            HashAlgId::Sha1,
            HashAlgId::Sha256,
            HashAlgId::Sha384,
        ] {
            reg.register_mac(
                &format!("HMAC({})", h.name()),
                Box::new(move |key| Ok(Box::new(HmacRecordMac::new(h, key)))),
            );
        }
        for h in [HashAlgId::Md5, HashAlgId::Sha1] {
            reg.register_mac(
                &format!("SSL3-MAC({})", h.name()),
                Box::new(move |key| Ok(Box::new(Ssl3RecordMac::new(h, key)))),
            );
        }

        reg
    }

    pub fn register_cipher(&mut self, name: &str, ctor: CipherCtor) {
        self.ciphers.insert(name.to_string(), ctor);
    }

    pub fn register_mac(&mut self, name: &str, ctor: MacCtor) {
        self.macs.insert(name.to_string(), ctor);
    }

    pub fn register_compressor(&mut self, name: &str, ctor: CompressorCtor) {
        self.compressors.insert(name.to_string(), ctor);
    }

    /// Instantiate the cipher registered under `name`.
    pub fn cipher(&self, name: &str, key: &[u8], iv: &[u8]) -> Result<Box<dyn RecordCipher>, TlsError> {
        let ctor = self
            .ciphers
            .get(name)
            .ok_or_else(|| TlsError::Config(format!("unknown cipher {name}")))?;
        ctor(key, iv)
    }

    /// Instantiate the MAC registered under `name`.
    pub fn mac(&self, name: &str, key: &[u8]) -> Result<Box<dyn RecordMac>, TlsError> {
        let ctor = self
            .macs
            .get(name)
            .ok_or_else(|| TlsError::Config(format!("unknown MAC {name}")))?;
        ctor(key)
    }

    /// Instantiate the compressor registered under `name`.
    pub fn compressor(&self, name: &str) -> Result<Box<dyn Compressor>, TlsError> {
        let ctor = self
            .compressors
            .get(name)
            .ok_or_else(|| TlsError::Config(format!("unknown compression method {name}")))?;
        Ok(ctor())
    }

    /// Resolve a hash by name.
    pub fn hash(&self, name: &str) -> Result<HashAlgId, TlsError> {
        HashAlgId::from_name(name).ok_or_else(|| TlsError::Config(format!("unknown hash {name}")))
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// CBC over a RustCrypto block cipher
// ---------------------------------------------------------------------------

/// CBC mode without padding; the chaining value carries across calls.
struct CbcCipher<C> {
    cipher: C,
    chain: Vec<u8>,
}

impl<C> CbcCipher<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit,
{
    fn new(key: &[u8], iv: &[u8]) -> Result<Self, TlsError> {
        let bs = C::block_size();
        if iv.len() != bs {
            return Err(TlsError::CryptoError(CryptoError::InvalidIvLength));
        }
        let cipher = C::new_from_slice(key).map_err(|_| {
            TlsError::CryptoError(CryptoError::InvalidKeyLength {
                expected: C::key_size(),
                got: key.len(),
            })
        })?;
        Ok(Self {
            cipher,
            chain: iv.to_vec(),
        })
    }

    fn check_aligned(&self, data: &[u8]) -> Result<(), TlsError> {
        if data.len() % C::block_size() != 0 {
            return Err(TlsError::CryptoError(CryptoError::NotBlockAligned));
        }
        Ok(())
    }
}

impl<C> RecordCipher for CbcCipher<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit + BlockSizeUser + Send,
{
    fn block_size(&self) -> Option<usize> {
        Some(C::block_size())
    }

    fn encrypt(&mut self, data: &mut [u8]) -> Result<(), TlsError> {
        self.check_aligned(data)?;
        for chunk in data.chunks_mut(C::block_size()) {
            for (b, c) in chunk.iter_mut().zip(self.chain.iter()) {
                *b ^= c;
            }
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(chunk));
            self.chain.copy_from_slice(chunk);
        }
        Ok(())
    }

    fn decrypt(&mut self, data: &mut [u8]) -> Result<(), TlsError> {
        self.check_aligned(data)?;
        let mut next_chain = vec![0u8; C::block_size()];
        for chunk in data.chunks_mut(C::block_size()) {
            next_chain.copy_from_slice(chunk);
            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(chunk));
            for (b, c) in chunk.iter_mut().zip(self.chain.iter()) {
                *b ^= c;
            }
            std::mem::swap(&mut self.chain, &mut next_chain);
        }
        Ok(())
    }
}

impl<C> Drop for CbcCipher<C> {
    fn drop(&mut self) {
        self.chain.zeroize();
    }
}

// ---------------------------------------------------------------------------
// RC4
// ---------------------------------------------------------------------------

struct Rc4Cipher {
    cipher: Rc4<U16>,
}

impl Rc4Cipher {
    fn new(key: &[u8]) -> Result<Self, TlsError> {
        let cipher = Rc4::<U16>::new_from_slice(key).map_err(|_| {
            TlsError::CryptoError(CryptoError::InvalidKeyLength {
                expected: 16,
                got: key.len(),
            })
        })?;
        Ok(Self { cipher })
    }
}

impl RecordCipher for Rc4Cipher {
    fn block_size(&self) -> Option<usize> {
        None
    }

    fn encrypt(&mut self, data: &mut [u8]) -> Result<(), TlsError> {
        self.cipher.apply_keystream(data);
        Ok(())
    }

    fn decrypt(&mut self, data: &mut [u8]) -> Result<(), TlsError> {
        self.cipher.apply_keystream(data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MACs
// ---------------------------------------------------------------------------

struct HmacRecordMac {
    alg: HashAlgId,
    key: Vec<u8>,
}

impl HmacRecordMac {
    fn new(alg: HashAlgId, key: &[u8]) -> Self {
        Self {
            alg,
            key: key.to_vec(),
        }
    }
}

impl RecordMac for HmacRecordMac {
    fn output_len(&self) -> usize {
        self.alg.output_len()
    }

    fn compute(&self, parts: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
        hash::hmac(self.alg, &self.key, parts)
    }
}

impl Drop for HmacRecordMac {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// SSLv3 record MAC: `hash(key || pad_2 || hash(key || pad_1 || data))`.
struct Ssl3RecordMac {
    alg: HashAlgId,
    key: Vec<u8>,
}

impl Ssl3RecordMac {
    fn new(alg: HashAlgId, key: &[u8]) -> Self {
        Self {
            alg,
            key: key.to_vec(),
        }
    }
}

impl RecordMac for Ssl3RecordMac {
    fn output_len(&self) -> usize {
        self.alg.output_len()
    }

    fn compute(&self, parts: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
        hash::ssl3_keyed_hash(self.alg, &self.key, parts)
    }
}

impl Drop for Ssl3RecordMac {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
