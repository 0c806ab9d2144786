//! Hello extensions (RFC 5246 §7.4.1.4 and the RFCs of each extension).
//!
//! The known kinds form a closed enum. A hello's block is an
//! [`Extensions`] map keyed by type code, so encoding always emits them in
//! ascending type order. Unknown types are skipped on decode.

use std::collections::BTreeMap;

use bastion_types::{EccCurveId, TlsError};

use crate::crypt::SignatureScheme;
use crate::handshake::codec::{put_u16, put_vec16, put_vec8, Reader};

/// TLS extension type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExtensionType(pub u16);

impl ExtensionType {
    pub const SERVER_NAME: Self = Self(0);
    pub const MAX_FRAGMENT_LENGTH: Self = Self(1);
    pub const SUPPORTED_ELLIPTIC_CURVES: Self = Self(10);
    pub const SRP_IDENTIFIER: Self = Self(12);
    pub const SIGNATURE_ALGORITHMS: Self = Self(13);
    pub const HEARTBEAT: Self = Self(15);
    pub const SESSION_TICKET: Self = Self(35);
    pub const NEXT_PROTOCOL: Self = Self(13172);
    pub const RENEGOTIATION_INFO: Self = Self(0xFF01);
}

/// Heartbeat mode: the sender of the extension lets its peer send requests.
pub const HEARTBEAT_PEER_ALLOWED_TO_SEND: u8 = 1;
/// Heartbeat mode: the peer must not send requests.
pub const HEARTBEAT_PEER_NOT_ALLOWED_TO_SEND: u8 = 2;

const SNI_HOST_NAME: u8 = 0;

/// One decoded hello extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// Host name; empty when a server acknowledges the client's name.
    ServerName(String),
    /// Requested plaintext fragment limit in bytes (512, 1024, 2048, 4096).
    MaxFragmentLength(usize),
    /// Curves the sender supports, in preference order. Unknown curves are
    /// dropped on decode.
    SupportedEllipticCurves(Vec<EccCurveId>),
    SrpIdentifier(String),
    SignatureAlgorithms(Vec<SignatureScheme>),
    Heartbeat { peer_allowed_to_send: bool },
    /// Empty to request or acknowledge ticket support, otherwise a ticket.
    SessionTicket(Vec<u8>),
    /// Empty from a client; the advertised protocols from a server.
    NextProtocol(Vec<String>),
    /// Previous Finished verify data (RFC 5746).
    RenegotiationInfo(Vec<u8>),
}

impl Extension {
    pub fn extension_type(&self) -> ExtensionType {
        match self {
            Extension::ServerName(_) => ExtensionType::SERVER_NAME,
            Extension::MaxFragmentLength(_) => ExtensionType::MAX_FRAGMENT_LENGTH,
            Extension::SupportedEllipticCurves(_) => ExtensionType::SUPPORTED_ELLIPTIC_CURVES,
            Extension::SrpIdentifier(_) => ExtensionType::SRP_IDENTIFIER,
            Extension::SignatureAlgorithms(_) => ExtensionType::SIGNATURE_ALGORITHMS,
            Extension::Heartbeat { .. } => ExtensionType::HEARTBEAT,
            Extension::SessionTicket(_) => ExtensionType::SESSION_TICKET,
            Extension::NextProtocol(_) => ExtensionType::NEXT_PROTOCOL,
            Extension::RenegotiationInfo(_) => ExtensionType::RENEGOTIATION_INFO,
        }
    }

    /// Map a fragment size to its RFC 6066 code.
    pub fn max_fragment_code(size: usize) -> Result<u8, TlsError> {
        match size {
            512 => Ok(1),
            1024 => Ok(2),
            2048 => Ok(3),
            4096 => Ok(4),
            other => Err(TlsError::Config(format!(
                "maximum fragment length {other} is not negotiable"
            ))),
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::new();
        match self {
            Extension::ServerName(name) => {
                if !name.is_empty() {
                    let mut entry = vec![SNI_HOST_NAME];
                    put_vec16(&mut entry, name.as_bytes());
                    put_vec16(&mut out, &entry);
                }
            }
            Extension::MaxFragmentLength(size) => out.push(Self::max_fragment_code(*size)?),
            Extension::SupportedEllipticCurves(curves) => {
                put_u16(&mut out, (curves.len() * 2) as u16);
                for c in curves {
                    put_u16(&mut out, c.tls_code());
                }
            }
            Extension::SrpIdentifier(id) => put_vec8(&mut out, id.as_bytes()),
            Extension::SignatureAlgorithms(schemes) => {
                put_u16(&mut out, (schemes.len() * 2) as u16);
                for s in schemes {
                    put_u16(&mut out, s.0);
                }
            }
            Extension::Heartbeat {
                peer_allowed_to_send,
            } => out.push(if *peer_allowed_to_send {
                HEARTBEAT_PEER_ALLOWED_TO_SEND
            } else {
                HEARTBEAT_PEER_NOT_ALLOWED_TO_SEND
            }),
            Extension::SessionTicket(ticket) => out.extend_from_slice(ticket),
            Extension::NextProtocol(protocols) => {
                for p in protocols {
                    put_vec8(&mut out, p.as_bytes());
                }
            }
            Extension::RenegotiationInfo(data) => put_vec8(&mut out, data),
        }
        Ok(out)
    }

    /// Decode the body of a known extension type; `None` for unknown types.
    fn decode_body(ty: u16, body: &[u8]) -> Result<Option<Self>, TlsError> {
        let mut r = Reader::new(body, "extension");
        let ext = match ExtensionType(ty) {
            ExtensionType::SERVER_NAME => {
                let mut name = String::new();
                if !r.is_empty() {
                    let list = r.vec16()?;
                    let mut lr = Reader::new(list, "server_name list");
                    while !lr.is_empty() {
                        let name_type = lr.u8()?;
                        let value = lr.vec16()?;
                        if name_type == SNI_HOST_NAME {
                            name = utf8(value, "server name")?;
                        }
                    }
                }
                Extension::ServerName(name)
            }
            ExtensionType::MAX_FRAGMENT_LENGTH => {
                let size = match r.u8()? {
                    1 => 512,
                    2 => 1024,
                    3 => 2048,
                    4 => 4096,
                    code => {
                        return Err(TlsError::IllegalParameter(format!(
                            "bad max_fragment_length code {code}"
                        )))
                    }
                };
                Extension::MaxFragmentLength(size)
            }
            ExtensionType::SUPPORTED_ELLIPTIC_CURVES => Extension::SupportedEllipticCurves(
                r.u16_list()?
                    .into_iter()
                    .filter_map(EccCurveId::from_tls_code)
                    .collect(),
            ),
            ExtensionType::SRP_IDENTIFIER => {
                Extension::SrpIdentifier(utf8(r.vec8()?, "SRP identifier")?)
            }
            ExtensionType::SIGNATURE_ALGORITHMS => Extension::SignatureAlgorithms(
                r.u16_list()?.into_iter().map(SignatureScheme).collect(),
            ),
            ExtensionType::HEARTBEAT => {
                let peer_allowed_to_send = match r.u8()? {
                    HEARTBEAT_PEER_ALLOWED_TO_SEND => true,
                    HEARTBEAT_PEER_NOT_ALLOWED_TO_SEND => false,
                    mode => {
                        return Err(TlsError::DecodeError(format!(
                            "unknown heartbeat mode {mode}"
                        )))
                    }
                };
                Extension::Heartbeat {
                    peer_allowed_to_send,
                }
            }
            ExtensionType::SESSION_TICKET => Extension::SessionTicket(r.rest().to_vec()),
            ExtensionType::NEXT_PROTOCOL => {
                let mut protocols = Vec::new();
                while !r.is_empty() {
                    let p = r.vec8()?;
                    if p.is_empty() {
                        return Err(TlsError::DecodeError("empty NPN protocol".into()));
                    }
                    protocols.push(utf8(p, "NPN protocol")?);
                }
                Extension::NextProtocol(protocols)
            }
            ExtensionType::RENEGOTIATION_INFO => {
                Extension::RenegotiationInfo(r.vec8()?.to_vec())
            }
            _ => return Ok(None),
        };
        r.finish()?;
        Ok(Some(ext))
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, TlsError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TlsError::DecodeError(format!("{what} is not UTF-8")))
}

/// The extension block of a hello message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    map: BTreeMap<u16, Extension>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an extension.
    pub fn add(&mut self, ext: Extension) {
        self.map.insert(ext.extension_type().0, ext);
    }

    pub fn get(&self, ty: ExtensionType) -> Option<&Extension> {
        self.map.get(&ty.0)
    }

    pub fn contains(&self, ty: ExtensionType) -> bool {
        self.map.contains_key(&ty.0)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Type codes present, ascending.
    pub fn types(&self) -> impl Iterator<Item = ExtensionType> + '_ {
        self.map.keys().map(|&t| ExtensionType(t))
    }

    pub fn server_name(&self) -> Option<&str> {
        match self.get(ExtensionType::SERVER_NAME) {
            Some(Extension::ServerName(name)) => Some(name),
            _ => None,
        }
    }

    pub fn max_fragment_length(&self) -> Option<usize> {
        match self.get(ExtensionType::MAX_FRAGMENT_LENGTH) {
            Some(Extension::MaxFragmentLength(size)) => Some(*size),
            _ => None,
        }
    }

    pub fn elliptic_curves(&self) -> Option<&[EccCurveId]> {
        match self.get(ExtensionType::SUPPORTED_ELLIPTIC_CURVES) {
            Some(Extension::SupportedEllipticCurves(c)) => Some(c),
            _ => None,
        }
    }

    pub fn srp_identifier(&self) -> Option<&str> {
        match self.get(ExtensionType::SRP_IDENTIFIER) {
            Some(Extension::SrpIdentifier(id)) => Some(id),
            _ => None,
        }
    }

    pub fn signature_algorithms(&self) -> Option<&[SignatureScheme]> {
        match self.get(ExtensionType::SIGNATURE_ALGORITHMS) {
            Some(Extension::SignatureAlgorithms(s)) => Some(s),
            _ => None,
        }
    }

    /// `Some(peer_allowed_to_send)` if heartbeats were advertised.
    pub fn heartbeat(&self) -> Option<bool> {
        match self.get(ExtensionType::HEARTBEAT) {
            Some(Extension::Heartbeat {
                peer_allowed_to_send,
            }) => Some(*peer_allowed_to_send),
            _ => None,
        }
    }

    pub fn session_ticket(&self) -> Option<&[u8]> {
        match self.get(ExtensionType::SESSION_TICKET) {
            Some(Extension::SessionTicket(t)) => Some(t),
            _ => None,
        }
    }

    pub fn next_protocols(&self) -> Option<&[String]> {
        match self.get(ExtensionType::NEXT_PROTOCOL) {
            Some(Extension::NextProtocol(p)) => Some(p),
            _ => None,
        }
    }

    pub fn renegotiation_info(&self) -> Option<&[u8]> {
        match self.get(ExtensionType::RENEGOTIATION_INFO) {
            Some(Extension::RenegotiationInfo(d)) => Some(d),
            _ => None,
        }
    }

    /// Append the block to `out`. An empty map writes nothing, which
    /// keeps hellos without extensions SSLv3-compatible.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), TlsError> {
        if self.map.is_empty() {
            return Ok(());
        }
        let mut block = Vec::new();
        for (ty, ext) in &self.map {
            put_u16(&mut block, *ty);
            put_vec16(&mut block, &ext.encode_body()?);
        }
        put_vec16(out, &block);
        Ok(())
    }

    /// Decode the optional block at the end of a hello.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let mut exts = Self::new();
        if r.is_empty() {
            return Ok(exts);
        }
        let block = r.vec16()?;
        let mut br = Reader::new(block, "extensions");
        let mut seen = std::collections::BTreeSet::new();
        while !br.is_empty() {
            let ty = br.u16()?;
            let body = br.vec16()?;
            if !seen.insert(ty) {
                return Err(TlsError::DecodeError(format!(
                    "duplicate extension {ty}"
                )));
            }
            match Extension::decode_body(ty, body)? {
                Some(ext) => exts.add(ext),
                None => log::trace!("skipping unknown extension {ty}"),
            }
        }
        Ok(exts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(exts: &Extensions) -> Extensions {
        let mut out = Vec::new();
        exts.encode(&mut out).unwrap();
        let mut r = Reader::new(&out, "test");
        let decoded = Extensions::decode(&mut r).unwrap();
        r.finish().unwrap();
        decoded
    }

    #[test]
    fn test_empty_block_writes_nothing() {
        let mut out = Vec::new();
        Extensions::new().encode(&mut out).unwrap();
        assert!(out.is_empty());
        let mut r = Reader::new(&[], "test");
        assert!(Extensions::decode(&mut r).unwrap().is_empty());
    }

    #[test]
    fn test_all_kinds_survive_encoding() {
        let mut exts = Extensions::new();
        exts.add(Extension::RenegotiationInfo(vec![1, 2, 3]));
        exts.add(Extension::ServerName("example.com".into()));
        exts.add(Extension::MaxFragmentLength(2048));
        exts.add(Extension::SupportedEllipticCurves(vec![
            EccCurveId::X25519,
            EccCurveId::Secp256r1,
        ]));
        exts.add(Extension::SrpIdentifier("alice".into()));
        exts.add(Extension::SignatureAlgorithms(vec![
            SignatureScheme::RSA_PKCS1_SHA256,
        ]));
        exts.add(Extension::Heartbeat {
            peer_allowed_to_send: true,
        });
        exts.add(Extension::SessionTicket(vec![]));
        exts.add(Extension::NextProtocol(vec!["http/1.1".into(), "spdy/2".into()]));

        let decoded = roundtrip(&exts);
        assert_eq!(decoded, exts);
        assert_eq!(decoded.server_name(), Some("example.com"));
        assert_eq!(decoded.max_fragment_length(), Some(2048));
        assert_eq!(decoded.heartbeat(), Some(true));
        assert_eq!(decoded.renegotiation_info(), Some(&[1u8, 2, 3][..]));
        assert_eq!(decoded.session_ticket(), Some(&[][..]));
        assert_eq!(decoded.next_protocols().unwrap().len(), 2);
    }

    #[test]
    fn test_serialized_in_type_order() {
        let mut exts = Extensions::new();
        exts.add(Extension::RenegotiationInfo(vec![]));
        exts.add(Extension::ServerName("a".into()));
        let mut out = Vec::new();
        exts.encode(&mut out).unwrap();
        // block length, then SNI (type 0) before renegotiation_info
        assert_eq!(&out[2..4], &[0, 0]);
        assert_eq!(exts.types().last(), Some(ExtensionType::RENEGOTIATION_INFO));
    }

    #[test]
    fn test_unknown_skipped_duplicate_rejected() {
        // unknown type 0x1234 with 2 bytes, then empty reneg info
        let block = [0x12, 0x34, 0, 2, 9, 9, 0xFF, 0x01, 0, 1, 0];
        let mut wire = vec![0, block.len() as u8];
        wire.extend_from_slice(&block);
        let exts = Extensions::decode(&mut Reader::new(&wire, "t")).unwrap();
        assert_eq!(exts.len(), 1);
        assert_eq!(exts.renegotiation_info(), Some(&[][..]));

        let block = [0xFF, 0x01, 0, 1, 0, 0xFF, 0x01, 0, 1, 0];
        let mut wire = vec![0, block.len() as u8];
        wire.extend_from_slice(&block);
        assert!(matches!(
            Extensions::decode(&mut Reader::new(&wire, "t")),
            Err(TlsError::DecodeError(_))
        ));
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(Extension::decode_body(15, &[3]).is_err());
        assert!(Extension::decode_body(1, &[9]).is_err());
        assert!(Extension::decode_body(13172, &[0]).is_err());
        assert!(Extension::decode_body(0xFF01, &[2, 1]).is_err());
        assert!(Extension::decode_body(0xFF01, &[0, 0]).is_err());
        assert!(Extension::max_fragment_code(1000).is_err());
    }

    #[test]
    fn test_unknown_curves_dropped() {
        let ext = Extension::decode_body(10, &[0, 4, 0, 99, 0, 23]).unwrap().unwrap();
        assert_eq!(
            ext,
            Extension::SupportedEllipticCurves(vec![EccCurveId::Secp256r1])
        );
    }
}
