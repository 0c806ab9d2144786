//! Heartbeat messages (RFC 6520).
//!
//! ```text
//! struct {
//!     HeartbeatMessageType type;
//!     uint16 payload_length;
//!     opaque payload[payload_length];
//!     opaque padding[padding_length];   // at least 16 bytes
//! } HeartbeatMessage;
//! ```

use bastion_types::TlsError;

use crate::handshake::codec::put_u16;
use crate::record::MAX_PLAINTEXT_LENGTH;

pub const MIN_PADDING_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeartbeatType {
    Request = 1,
    Response = 2,
}

/// The largest payload that still fits one record with its padding.
pub const MAX_PAYLOAD_LEN: usize = MAX_PLAINTEXT_LENGTH - 3 - MIN_PADDING_LEN;

pub fn encode_heartbeat(
    ty: HeartbeatType,
    payload: &[u8],
    padding: &[u8],
) -> Result<Vec<u8>, TlsError> {
    if payload.len() > MAX_PAYLOAD_LEN || padding.len() < MIN_PADDING_LEN {
        return Err(TlsError::InternalError(
            "heartbeat payload or padding out of range".into(),
        ));
    }
    let mut out = Vec::with_capacity(3 + payload.len() + padding.len());
    out.push(ty as u8);
    put_u16(&mut out, payload.len() as u16);
    out.extend_from_slice(payload);
    out.extend_from_slice(padding);
    Ok(out)
}

/// Parse a heartbeat message. `None` for anything malformed, which the
/// receiver discards without an alert.
pub fn decode_heartbeat(msg: &[u8]) -> Option<(HeartbeatType, &[u8])> {
    if msg.len() < 3 {
        return None;
    }
    let ty = match msg[0] {
        1 => HeartbeatType::Request,
        2 => HeartbeatType::Response,
        _ => return None,
    };
    let len = u16::from_be_bytes([msg[1], msg[2]]) as usize;
    if 3 + len + MIN_PADDING_LEN > msg.len() {
        return None;
    }
    Some((ty, &msg[3..3 + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let msg = encode_heartbeat(HeartbeatType::Request, b"ping", &[0xEE; 16]).unwrap();
        assert_eq!(&msg[..7], &[1, 0, 4, b'p', b'i', b'n', b'g']);
        assert_eq!(msg.len(), 3 + 4 + 16);
        assert_eq!(
            decode_heartbeat(&msg),
            Some((HeartbeatType::Request, &b"ping"[..]))
        );
    }

    #[test]
    fn test_overlong_length_discarded() {
        // Claims 100 bytes of payload but carries 4.
        let mut msg = vec![1, 0, 100];
        msg.extend_from_slice(b"ping");
        msg.extend_from_slice(&[0; 16]);
        assert_eq!(decode_heartbeat(&msg), None);
    }

    #[test]
    fn test_short_padding_discarded() {
        let mut msg = vec![2, 0, 1, 9];
        msg.extend_from_slice(&[0; 15]);
        assert_eq!(decode_heartbeat(&msg), None);
        msg.push(0);
        assert_eq!(
            decode_heartbeat(&msg),
            Some((HeartbeatType::Response, &[9u8][..]))
        );
    }

    #[test]
    fn test_unknown_type_and_truncation() {
        assert_eq!(decode_heartbeat(&[3, 0, 0]), None);
        assert_eq!(decode_heartbeat(&[1, 0]), None);
    }

    #[test]
    fn test_encode_limits() {
        assert!(encode_heartbeat(HeartbeatType::Request, b"x", &[0; 15]).is_err());
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(encode_heartbeat(HeartbeatType::Request, &big, &[0; 16]).is_err());
    }
}
