//! TLS record layer: framing, fragmentation, compression, and
//! MAC-then-encrypt protection.

pub mod cipher_state;
pub mod reader;
pub mod writer;

pub use cipher_state::ConnectionCipherState;
pub use reader::{ReadOutcome, RecordReader};
pub use writer::{OutputFn, RecordWriter};

use bastion_types::TlsError;

/// Record header size: content_type(1) + version(2) + length(2).
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext fragment size (2^14 bytes, RFC 5246 §6.2.1).
pub const MAX_PLAINTEXT_LENGTH: usize = 16384;

/// Maximum compressed fragment size (RFC 5246 §6.2.2).
pub const MAX_COMPRESSED_LENGTH: usize = MAX_PLAINTEXT_LENGTH + 1024;

/// Maximum protected fragment size (RFC 5246 §6.2.3).
pub const MAX_CIPHERTEXT_LENGTH: usize = MAX_COMPRESSED_LENGTH + 1024;

/// Smallest fragment limit a peer may request (RFC 6066 §4).
pub const MIN_FRAGMENT_LENGTH: usize = 128;

/// Compression method 0 (null).
pub const NO_COMPRESSION: u8 = 0;
/// Compression method 1 (RFC 3749).
pub const DEFLATE_COMPRESSION: u8 = 1;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Heartbeat = 24,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Result<Self, TlsError> {
        match v {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            24 => Ok(ContentType::Heartbeat),
            _ => Err(TlsError::UnexpectedMessage(format!(
                "unknown record type {v}"
            ))),
        }
    }
}

/// Registry name of a compression method, or `None` for the null method.
pub fn compression_method_name(method: u8) -> Result<Option<&'static str>, TlsError> {
    match method {
        NO_COMPRESSION => Ok(None),
        DEFLATE_COMPRESSION => Ok(Some("Deflate")),
        other => Err(TlsError::Config(format!(
            "unknown compression method {other}"
        ))),
    }
}

/// Clamp a configured fragment limit; 0 means the protocol maximum.
pub(crate) fn clamp_fragment_size(size: usize) -> usize {
    if size == 0 {
        MAX_PLAINTEXT_LENGTH
    } else {
        size.clamp(MIN_FRAGMENT_LENGTH, MAX_PLAINTEXT_LENGTH)
    }
}

/// The 5-byte record header.
pub(crate) fn encode_header(
    content_type: ContentType,
    version: crate::ProtocolVersion,
    len: usize,
) -> [u8; RECORD_HEADER_LEN] {
    let len = (len as u16).to_be_bytes();
    [
        content_type as u8,
        version.major,
        version.minor,
        len[0],
        len[1],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_values() {
        assert_eq!(ContentType::from_u8(24).unwrap(), ContentType::Heartbeat);
        assert_eq!(ContentType::from_u8(22).unwrap() as u8, 22);
        assert!(matches!(
            ContentType::from_u8(99),
            Err(TlsError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_fragment_clamp() {
        assert_eq!(clamp_fragment_size(0), MAX_PLAINTEXT_LENGTH);
        assert_eq!(clamp_fragment_size(10), MIN_FRAGMENT_LENGTH);
        assert_eq!(clamp_fragment_size(512), 512);
        assert_eq!(clamp_fragment_size(1 << 20), MAX_PLAINTEXT_LENGTH);
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(compression_method_name(0).unwrap(), None);
        assert_eq!(compression_method_name(1).unwrap(), Some("Deflate"));
        assert!(compression_method_name(64).is_err());
    }
}
