#![forbid(unsafe_code)]
#![doc = "Sans-IO TLS record layer and handshake engine (SSLv3, TLS 1.0-1.2)."]

pub mod alert;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod crypt;
pub mod extensions;
pub mod handshake;
pub mod record;
pub mod session;

use std::fmt;

pub use bastion_types::TlsError;

/// TLS protocol version as the {major, minor} byte pair on the wire.
///
/// Ordered, so that policy bounds and downgrade checks are plain
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const SSL_V3: Self = Self::new(3, 0);
    pub const TLS_V10: Self = Self::new(3, 1);
    pub const TLS_V11: Self = Self::new(3, 2);
    pub const TLS_V12: Self = Self::new(3, 3);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn from_u16(v: u16) -> Self {
        Self::new((v >> 8) as u8, v as u8)
    }

    pub fn to_u16(self) -> u16 {
        u16::from_be_bytes([self.major, self.minor])
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.major, self.minor]
    }

    /// One of the versions this engine can speak.
    pub fn is_known(self) -> bool {
        self >= Self::SSL_V3 && self <= Self::TLS_V12
    }

    /// TLS 1.1 and later carry an explicit per-record CBC IV.
    pub fn supports_explicit_cbc_ivs(self) -> bool {
        self >= Self::TLS_V11
    }

    /// TLS 1.2 negotiates the PRF hash with the ciphersuite.
    pub fn supports_ciphersuite_specific_prf(self) -> bool {
        self >= Self::TLS_V12
    }

    /// TLS 1.2 signatures carry an explicit {hash, signature} pair.
    pub fn supports_negotiable_signature_algorithms(self) -> bool {
        self >= Self::TLS_V12
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SSL_V3 => write!(f, "SSL v3"),
            v if v.major == 3 && v.minor > 0 => write!(f, "TLS v1.{}", v.minor - 1),
            v => write!(f, "unknown version {}.{}", v.major, v.minor),
        }
    }
}

/// TLS cipher suite identifier (wire value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CipherSuite(pub u16);

/// The role of a TLS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsRole {
    Client,
    Server,
}

impl TlsRole {
    pub fn peer(self) -> Self {
        match self {
            TlsRole::Client => TlsRole::Server,
            TlsRole::Server => TlsRole::Client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(ProtocolVersion::SSL_V3 < ProtocolVersion::TLS_V10);
        assert!(ProtocolVersion::TLS_V11 < ProtocolVersion::TLS_V12);
        assert!(ProtocolVersion::new(4, 0) > ProtocolVersion::TLS_V12);
        assert!(!ProtocolVersion::new(4, 0).is_known());
        assert!(ProtocolVersion::TLS_V11.supports_explicit_cbc_ivs());
        assert!(!ProtocolVersion::TLS_V10.supports_explicit_cbc_ivs());
    }

    #[test]
    fn test_version_wire_form() {
        assert_eq!(ProtocolVersion::TLS_V12.to_u16(), 0x0303);
        assert_eq!(ProtocolVersion::from_u16(0x0301), ProtocolVersion::TLS_V10);
        assert_eq!(ProtocolVersion::SSL_V3.to_bytes(), [3, 0]);
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::SSL_V3.to_string(), "SSL v3");
        assert_eq!(ProtocolVersion::TLS_V12.to_string(), "TLS v1.2");
    }

    #[test]
    fn test_role_peer() {
        assert_eq!(TlsRole::Client.peer(), TlsRole::Server);
    }
}
