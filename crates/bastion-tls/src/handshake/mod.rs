//! TLS handshake protocol: message codec, per-attempt state, and the client
//! and server state machines.

pub mod client;
pub mod codec;
pub mod messages;
pub mod reassembly;
pub mod renegotiation;
pub mod server;
pub mod state;

use bastion_types::TlsError;

/// Handshake message types (RFC 5246 §7.4), plus two pseudo types used
/// only inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    NextProtocol = 67,
    /// An SSLv2-format ClientHello, delivered by the record reader outside
    /// the handshake record stream.
    ClientHelloSslv2 = 253,
    /// A ChangeCipherSpec record, sequenced through the handshake automaton.
    HandshakeCcs = 254,
}

impl HandshakeType {
    /// Parse a message type seen on the wire. Neither pseudo type may
    /// appear inside a handshake record.
    pub fn from_u8(v: u8) -> Result<Self, TlsError> {
        Ok(match v {
            0 => Self::HelloRequest,
            1 => Self::ClientHello,
            2 => Self::ServerHello,
            4 => Self::NewSessionTicket,
            11 => Self::Certificate,
            12 => Self::ServerKeyExchange,
            13 => Self::CertificateRequest,
            14 => Self::ServerHelloDone,
            15 => Self::CertificateVerify,
            16 => Self::ClientKeyExchange,
            20 => Self::Finished,
            67 => Self::NextProtocol,
            _ => {
                return Err(TlsError::UnexpectedMessage(format!(
                    "unknown handshake message type {v}"
                )))
            }
        })
    }

    fn bit(self) -> u16 {
        let idx = match self {
            Self::HelloRequest => 0,
            Self::ClientHello => 1,
            Self::ServerHello => 2,
            Self::NewSessionTicket => 3,
            Self::Certificate => 4,
            Self::ServerKeyExchange => 5,
            Self::CertificateRequest => 6,
            Self::ServerHelloDone => 7,
            Self::CertificateVerify => 8,
            Self::ClientKeyExchange => 9,
            Self::Finished => 10,
            Self::NextProtocol => 11,
            Self::ClientHelloSslv2 => 12,
            Self::HandshakeCcs => 13,
        };
        1 << idx
    }
}

/// A small set of handshake message types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeTypeSet(u16);

impl HandshakeTypeSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, ty: HandshakeType) {
        self.0 |= ty.bit();
    }

    pub fn contains(&self, ty: HandshakeType) -> bool {
        self.0 & ty.bit() != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_types() {
        for v in [0u8, 1, 2, 4, 11, 12, 13, 14, 15, 16, 20, 67] {
            assert_eq!(HandshakeType::from_u8(v).unwrap() as u8, v);
        }
        for v in [253u8, 254] {
            assert!(matches!(
                HandshakeType::from_u8(v),
                Err(TlsError::UnexpectedMessage(_))
            ));
        }
        assert!(HandshakeType::from_u8(8).is_err());
    }

    #[test]
    fn test_type_set() {
        let mut set = HandshakeTypeSet::empty();
        assert!(set.is_empty());
        set.insert(HandshakeType::Certificate);
        set.insert(HandshakeType::HandshakeCcs);
        assert!(set.contains(HandshakeType::Certificate));
        assert!(set.contains(HandshakeType::HandshakeCcs));
        assert!(!set.contains(HandshakeType::Finished));
        set.clear();
        assert!(!set.contains(HandshakeType::Certificate));
    }
}
