//! Handshake message reassembly over the record stream.
//!
//! A message may span several records and one record may carry several
//! messages. Bytes are appended as Handshake records arrive and complete
//! messages are taken off the front.

use bastion_types::TlsError;

use super::HandshakeType;

/// Upper bound on a single handshake message body.
pub const MAX_HANDSHAKE_MESSAGE_LEN: usize = 1 << 18;

/// Stream reassembler for handshake messages.
#[derive(Debug, Default)]
pub struct HandshakeReader {
    buf: Vec<u8>,
}

impl HandshakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// No partial message is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Move out everything buffered, leaving this reader empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Put `earlier` bytes in front of whatever is buffered.
    pub fn prepend(&mut self, mut earlier: Self) {
        earlier.buf.append(&mut self.buf);
        self.buf = earlier.buf;
    }

    /// Take the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<(HandshakeType, Vec<u8>)>, TlsError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let msg_type = HandshakeType::from_u8(self.buf[0])?;
        let len =
            ((self.buf[1] as usize) << 16) | ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
        if len > MAX_HANDSHAKE_MESSAGE_LEN {
            return Err(TlsError::DecodeError(format!(
                "handshake message of {len} bytes"
            )));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let body = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some((msg_type, body)))
    }
}
