//! Wire primitives shared by the handshake messages and extensions:
//! a bounds-checked read cursor and length-prefixed writers.

use bastion_types::TlsError;

use super::HandshakeType;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Cursor over a message body. Every short read is a
/// [`TlsError::DecodeError`] naming the structure being parsed.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn short(&self, field: &str) -> TlsError {
        TlsError::DecodeError(format!("{}: truncated {field}", self.what))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(self.short("field"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Result<usize, TlsError> {
        let b = self.bytes(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    pub fn u32(&mut self) -> Result<u32, TlsError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], TlsError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn vec8(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u8()? as usize;
        self.bytes(n).map_err(|_| self.short("u8 vector"))
    }

    pub fn vec16(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u16()? as usize;
        self.bytes(n).map_err(|_| self.short("u16 vector"))
    }

    pub fn vec24(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u24()?;
        self.bytes(n).map_err(|_| self.short("u24 vector"))
    }

    /// A vector of u16 values with a u16 byte-length prefix.
    pub fn u16_list(&mut self) -> Result<Vec<u16>, TlsError> {
        let raw = self.vec16()?;
        if raw.len() % 2 != 0 {
            return Err(TlsError::DecodeError(format!(
                "{}: odd-length u16 list",
                self.what
            )));
        }
        Ok(raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Fail unless the body was consumed exactly.
    pub fn finish(&self) -> Result<(), TlsError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TlsError::DecodeError(format!(
                "{}: {} trailing bytes",
                self.what,
                self.remaining()
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
}

pub fn put_vec8(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

pub fn put_vec16(out: &mut Vec<u8>, data: &[u8]) {
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
}

pub fn put_vec24(out: &mut Vec<u8>, data: &[u8]) {
    put_u24(out, data.len());
    out.extend_from_slice(data);
}

/// Prefix a body with the 4-byte handshake header {type, u24 length}.
pub fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type as u8);
    put_vec24(&mut out, body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_scalars() {
        let data = [1, 0x02, 0x03, 0x04, 0x05, 0x06, 9, 9, 9, 9];
        let mut r = Reader::new(&data, "test");
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u16().unwrap(), 0x0203);
        assert_eq!(r.u24().unwrap(), 0x040506);
        assert_eq!(r.u32().unwrap(), 0x09090909);
        assert!(r.is_empty());
        r.finish().unwrap();
        assert!(matches!(r.u8(), Err(TlsError::DecodeError(_))));
    }

    #[test]
    fn test_reader_vectors() {
        let data = [2, 0xAA, 0xBB, 0, 1, 0xCC, 0, 0, 1, 0xDD, 0xEE];
        let mut r = Reader::new(&data, "test");
        assert_eq!(r.vec8().unwrap(), &[0xAA, 0xBB]);
        assert_eq!(r.vec16().unwrap(), &[0xCC]);
        assert_eq!(r.vec24().unwrap(), &[0xDD]);
        assert!(matches!(r.finish(), Err(TlsError::DecodeError(_))));
        assert_eq!(r.rest(), &[0xEE]);
    }

    #[test]
    fn test_reader_truncated_vector() {
        let mut r = Reader::new(&[5, 1, 2], "test");
        assert!(matches!(r.vec8(), Err(TlsError::DecodeError(_))));
    }

    #[test]
    fn test_u16_list() {
        let mut r = Reader::new(&[0, 4, 0, 23, 0, 29], "curves");
        assert_eq!(r.u16_list().unwrap(), vec![23, 29]);
        let mut r = Reader::new(&[0, 3, 0, 23, 0], "curves");
        assert!(r.u16_list().is_err());
    }

    #[test]
    fn test_writers() {
        let mut out = Vec::new();
        put_vec8(&mut out, &[1]);
        put_vec16(&mut out, &[2]);
        put_vec24(&mut out, &[3]);
        assert_eq!(out, vec![1, 1, 0, 1, 2, 0, 0, 1, 3]);
        assert_eq!(
            wrap_handshake(HandshakeType::Finished, &[7; 2]),
            vec![20, 0, 0, 2, 7, 7]
        );
    }
}
