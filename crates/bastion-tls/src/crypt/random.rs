//! Randomness source consumed by the record layer and the handshake.
//!
//! The engine never reaches for ambient randomness: every random byte comes
//! from a [`RandomSource`] handed to it at construction time.

use bastion_types::{CryptoError, TlsError};
use rand::{CryptoRng, RngCore};

/// A cryptographically secure source of random bytes.
pub trait RandomSource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), TlsError>;

    /// Convenience: a freshly allocated random vector of `len` bytes.
    fn random_vec(&self, len: usize) -> Result<Vec<u8>, TlsError> {
        let mut v = vec![0u8; len];
        self.fill(&mut v)?;
        Ok(v)
    }
}

/// Operating system randomness via `getrandom`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TlsError> {
        getrandom::getrandom(buf).map_err(|_| TlsError::CryptoError(CryptoError::RandomFail))
    }
}

/// Adapts a [`RandomSource`] to `rand::RngCore` for primitives that need it
/// (RSA padding, ephemeral key generation).
///
/// `RngCore::fill_bytes` cannot fail, so a failure is latched and must be
/// checked with [`RngAdapter::finish`] once the primitive returns.
pub(crate) struct RngAdapter<'a> {
    source: &'a dyn RandomSource,
    failed: bool,
}

impl<'a> RngAdapter<'a> {
    pub(crate) fn new(source: &'a dyn RandomSource) -> Self {
        Self {
            source,
            failed: false,
        }
    }

    /// Report whether any draw failed while the adapter was in use.
    pub(crate) fn finish(self) -> Result<(), TlsError> {
        if self.failed {
            Err(TlsError::CryptoError(CryptoError::RandomFail))
        } else {
            Ok(())
        }
    }
}

impl RngCore for RngAdapter<'_> {
    fn next_u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.fill_bytes(&mut b);
        u32::from_le_bytes(b)
    }

    fn next_u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        self.fill_bytes(&mut b);
        u64::from_le_bytes(b)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if self.source.fill(dest).is_err() {
            self.failed = true;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.source.fill(dest).map_err(rand::Error::new)
    }
}

impl CryptoRng for RngAdapter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRandom;

    impl RandomSource for FailingRandom {
        fn fill(&self, _buf: &mut [u8]) -> Result<(), TlsError> {
            Err(TlsError::CryptoError(CryptoError::RandomFail))
        }
    }

    #[test]
    fn test_system_random_fills() {
        let a = SystemRandom.random_vec(32).unwrap();
        let b = SystemRandom.random_vec(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_adapter_latches_failure() {
        let src = FailingRandom;
        let mut rng = RngAdapter::new(&src);
        let mut buf = [0u8; 8];
        rng.fill_bytes(&mut buf);
        assert!(rng.try_fill_bytes(&mut buf).is_err());
        assert!(rng.finish().is_err());
    }

    #[test]
    fn test_adapter_ok() {
        let src = SystemRandom;
        let mut rng = RngAdapter::new(&src);
        let _ = rng.next_u64();
        assert!(rng.finish().is_ok());
    }
}
