//! Handshake message bodies (RFC 5246 §7.4, RFC 4279, RFC 4492, RFC 5054,
//! RFC 5077, and the NPN draft).
//!
//! Each message kind is one variant of [`HandshakeMessage`]. Bodies are
//! encoded and decoded without the 4-byte handshake header; the header is
//! added by [`wrap_handshake`](super::codec::wrap_handshake).

use bastion_types::{EccCurveId, TlsError};

use super::codec::{put_u16, put_u24, put_vec16, put_vec24, put_vec8, Reader};
use super::HandshakeType;
use crate::credentials::Certificate;
use crate::crypt::ciphersuite::{CipherSuiteInfo, KexAlgo, TLS_EMPTY_RENEGOTIATION_INFO_SCSV};
use crate::crypt::SignatureScheme;
use crate::extensions::{ExtensionType, Extensions};
use crate::{CipherSuite, ProtocolVersion};

/// Longest session id a hello may carry.
pub const MAX_SESSION_ID_LEN: usize = 32;

/// `curve_type` value for a named curve in ECDH parameters.
const NAMED_CURVE: u8 = 3;

// ---------------------------------------------------------------------------
// Hellos
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Extensions,
}

impl ClientHello {
    pub fn offered_suite(&self, suite: CipherSuite) -> bool {
        self.suites.contains(&suite)
    }

    /// RFC 5746 support, signalled by the extension or the SCSV.
    pub fn secure_renegotiation(&self) -> bool {
        self.extensions.contains(ExtensionType::RENEGOTIATION_INFO)
            || self.suites.contains(&TLS_EMPTY_RENEGOTIATION_INFO_SCSV)
    }

    pub fn renegotiation_info(&self) -> &[u8] {
        self.extensions.renegotiation_info().unwrap_or(&[])
    }

    pub fn sni_hostname(&self) -> &str {
        self.extensions.server_name().unwrap_or("")
    }

    pub fn srp_identifier(&self) -> &str {
        self.extensions.srp_identifier().unwrap_or("")
    }

    pub fn supports_session_ticket(&self) -> bool {
        self.extensions.contains(ExtensionType::SESSION_TICKET)
    }

    pub fn session_ticket(&self) -> &[u8] {
        self.extensions.session_ticket().unwrap_or(&[])
    }

    pub fn next_protocol_notification(&self) -> bool {
        self.extensions.contains(ExtensionType::NEXT_PROTOCOL)
    }

    pub fn supported_curves(&self) -> &[EccCurveId] {
        self.extensions.elliptic_curves().unwrap_or(&[])
    }

    pub fn signature_schemes(&self) -> &[SignatureScheme] {
        self.extensions.signature_algorithms().unwrap_or(&[])
    }

    /// Requested fragment limit, 0 if none.
    pub fn fragment_size(&self) -> usize {
        self.extensions.max_fragment_length().unwrap_or(0)
    }

    pub fn encode_body(&self) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.version.to_bytes());
        out.extend_from_slice(&self.random);
        put_vec8(&mut out, &self.session_id);
        put_u16(&mut out, (self.suites.len() * 2) as u16);
        for s in &self.suites {
            put_u16(&mut out, s.0);
        }
        put_vec8(&mut out, &self.compression_methods);
        self.extensions.encode(&mut out)?;
        Ok(out)
    }

    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "ClientHello");
        let [major, minor] = r.array::<2>()?;
        let random = r.array::<32>()?;
        let session_id = session_id(&mut r)?;
        let suites: Vec<CipherSuite> = r.u16_list()?.into_iter().map(CipherSuite).collect();
        let compression_methods = r.vec8()?.to_vec();
        if compression_methods.is_empty() {
            return Err(TlsError::DecodeError(
                "ClientHello offers no compression method".into(),
            ));
        }
        let extensions = Extensions::decode(&mut r)?;
        r.finish()?;
        Ok(Self {
            version: ProtocolVersion::new(major, minor),
            random,
            session_id,
            suites,
            compression_methods,
            extensions,
        })
    }

    /// Parse the body of an SSLv2-format CLIENT-HELLO.
    ///
    /// ```text
    /// u8 msg_type(1) || u16 version || u16 cipher_specs_len ||
    /// u16 session_id_len || u16 challenge_len ||
    /// cipher_specs (3 bytes each) || session_id || challenge
    /// ```
    ///
    /// Only the 3-byte specs with a zero first byte name TLS suites. The
    /// challenge is right-aligned into the 32-byte random.
    pub fn decode_sslv2(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "SSLv2 ClientHello");
        if r.u8()? != 1 {
            return Err(TlsError::DecodeError("SSLv2 message is not a hello".into()));
        }
        let [major, minor] = r.array::<2>()?;
        let specs_len = r.u16()? as usize;
        let session_id_len = r.u16()? as usize;
        let challenge_len = r.u16()? as usize;
        if specs_len % 3 != 0 {
            return Err(TlsError::DecodeError("bad SSLv2 cipher spec length".into()));
        }
        if !(16..=32).contains(&challenge_len) {
            return Err(TlsError::DecodeError("bad SSLv2 challenge length".into()));
        }
        if session_id_len > MAX_SESSION_ID_LEN {
            return Err(TlsError::DecodeError("SSLv2 session id too long".into()));
        }

        let mut suites = Vec::new();
        for spec in r.bytes(specs_len)?.chunks_exact(3) {
            if spec[0] == 0 {
                suites.push(CipherSuite(u16::from_be_bytes([spec[1], spec[2]])));
            }
        }
        let session_id = r.bytes(session_id_len)?.to_vec();
        let challenge = r.bytes(challenge_len)?;
        r.finish()?;

        let mut random = [0u8; 32];
        random[32 - challenge_len..].copy_from_slice(challenge);

        Ok(Self {
            version: ProtocolVersion::new(major, minor),
            random,
            session_id,
            suites,
            compression_methods: vec![0],
            extensions: Extensions::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Extensions,
}

impl ServerHello {
    pub fn secure_renegotiation(&self) -> bool {
        self.extensions.contains(ExtensionType::RENEGOTIATION_INFO)
    }

    pub fn renegotiation_info(&self) -> &[u8] {
        self.extensions.renegotiation_info().unwrap_or(&[])
    }

    pub fn supports_session_ticket(&self) -> bool {
        self.extensions.contains(ExtensionType::SESSION_TICKET)
    }

    pub fn next_protocol_notification(&self) -> bool {
        self.extensions.contains(ExtensionType::NEXT_PROTOCOL)
    }

    pub fn next_protocols(&self) -> &[String] {
        self.extensions.next_protocols().unwrap_or(&[])
    }

    /// Echoed fragment limit, 0 if none.
    pub fn fragment_size(&self) -> usize {
        self.extensions.max_fragment_length().unwrap_or(0)
    }

    pub fn encode_body(&self) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::with_capacity(80);
        out.extend_from_slice(&self.version.to_bytes());
        out.extend_from_slice(&self.random);
        put_vec8(&mut out, &self.session_id);
        put_u16(&mut out, self.suite.0);
        out.push(self.compression_method);
        self.extensions.encode(&mut out)?;
        Ok(out)
    }

    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "ServerHello");
        let [major, minor] = r.array::<2>()?;
        let random = r.array::<32>()?;
        let session_id = session_id(&mut r)?;
        let suite = CipherSuite(r.u16()?);
        let compression_method = r.u8()?;
        let extensions = Extensions::decode(&mut r)?;
        r.finish()?;
        Ok(Self {
            version: ProtocolVersion::new(major, minor),
            random,
            session_id,
            suite,
            compression_method,
            extensions,
        })
    }
}

fn session_id(r: &mut Reader<'_>) -> Result<Vec<u8>, TlsError> {
    let id = r.vec8()?;
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(TlsError::DecodeError(format!(
            "session id of {} bytes",
            id.len()
        )));
    }
    Ok(id.to_vec())
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

pub fn encode_certificate(chain: &[Certificate]) -> Vec<u8> {
    let mut list = Vec::new();
    for cert in chain {
        put_vec24(&mut list, cert.der());
    }
    let mut out = Vec::with_capacity(list.len() + 3);
    put_vec24(&mut out, &list);
    out
}

pub fn decode_certificate(body: &[u8]) -> Result<Vec<Certificate>, TlsError> {
    let mut r = Reader::new(body, "Certificate");
    let mut lr = Reader::new(r.vec24()?, "certificate list");
    r.finish()?;
    let mut chain = Vec::new();
    while !lr.is_empty() {
        let der = lr.vec24()?;
        if der.is_empty() {
            return Err(TlsError::DecodeError("empty certificate".into()));
        }
        chain.push(Certificate(der.to_vec()));
    }
    Ok(chain)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// ClientCertificateType codes.
    pub cert_types: Vec<u8>,
    /// Present in TLS 1.2 only.
    pub schemes: Vec<SignatureScheme>,
    /// DER distinguished names.
    pub authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn encode_body(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut out = Vec::new();
        put_vec8(&mut out, &self.cert_types);
        if version.supports_negotiable_signature_algorithms() {
            put_u16(&mut out, (self.schemes.len() * 2) as u16);
            for s in &self.schemes {
                put_u16(&mut out, s.0);
            }
        }
        let mut names = Vec::new();
        for dn in &self.authorities {
            put_vec16(&mut names, dn);
        }
        put_vec16(&mut out, &names);
        out
    }

    pub fn decode(body: &[u8], version: ProtocolVersion) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "CertificateRequest");
        let cert_types = r.vec8()?.to_vec();
        if cert_types.is_empty() {
            return Err(TlsError::DecodeError(
                "CertificateRequest lists no certificate types".into(),
            ));
        }
        let schemes = if version.supports_negotiable_signature_algorithms() {
            r.u16_list()?.into_iter().map(SignatureScheme).collect()
        } else {
            Vec::new()
        };
        let mut nr = Reader::new(r.vec16()?, "certificate authorities");
        r.finish()?;
        let mut authorities = Vec::new();
        while !nr.is_empty() {
            authorities.push(nr.vec16()?.to_vec());
        }
        Ok(Self {
            cert_types,
            schemes,
            authorities,
        })
    }
}

// ---------------------------------------------------------------------------
// Key exchange
// ---------------------------------------------------------------------------

/// The key exchange parameters of a ServerKeyExchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKexParams {
    Dh {
        p: Vec<u8>,
        g: Vec<u8>,
        public: Vec<u8>,
    },
    Ecdh {
        curve: EccCurveId,
        public: Vec<u8>,
    },
    Psk {
        identity_hint: String,
    },
    DhePsk {
        identity_hint: String,
        p: Vec<u8>,
        g: Vec<u8>,
        public: Vec<u8>,
    },
    EcdhePsk {
        identity_hint: String,
        curve: EccCurveId,
        public: Vec<u8>,
    },
    Srp {
        n: Vec<u8>,
        g: Vec<u8>,
        salt: Vec<u8>,
        public_b: Vec<u8>,
    },
}

impl ServerKexParams {
    /// The serialized parameters, which are what the signature covers.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            ServerKexParams::Dh { p, g, public } => put_dh(&mut out, p, g, public),
            ServerKexParams::Ecdh { curve, public } => put_ecdh(&mut out, *curve, public),
            ServerKexParams::Psk { identity_hint } => put_vec16(&mut out, identity_hint.as_bytes()),
            ServerKexParams::DhePsk {
                identity_hint,
                p,
                g,
                public,
            } => {
                put_vec16(&mut out, identity_hint.as_bytes());
                put_dh(&mut out, p, g, public);
            }
            ServerKexParams::EcdhePsk {
                identity_hint,
                curve,
                public,
            } => {
                put_vec16(&mut out, identity_hint.as_bytes());
                put_ecdh(&mut out, *curve, public);
            }
            ServerKexParams::Srp {
                n,
                g,
                salt,
                public_b,
            } => {
                put_vec16(&mut out, n);
                put_vec16(&mut out, g);
                put_vec8(&mut out, salt);
                put_vec16(&mut out, public_b);
            }
        }
        out
    }

    fn decode(r: &mut Reader<'_>, kex: KexAlgo) -> Result<Self, TlsError> {
        Ok(match kex {
            KexAlgo::Dh => {
                let (p, g, public) = dh(r)?;
                ServerKexParams::Dh { p, g, public }
            }
            KexAlgo::Ecdh => {
                let (curve, public) = ecdh(r)?;
                ServerKexParams::Ecdh { curve, public }
            }
            KexAlgo::Psk => ServerKexParams::Psk {
                identity_hint: utf8(r.vec16()?, "PSK identity hint")?,
            },
            KexAlgo::DhePsk => {
                let identity_hint = utf8(r.vec16()?, "PSK identity hint")?;
                let (p, g, public) = dh(r)?;
                ServerKexParams::DhePsk {
                    identity_hint,
                    p,
                    g,
                    public,
                }
            }
            KexAlgo::EcdhePsk => {
                let identity_hint = utf8(r.vec16()?, "PSK identity hint")?;
                let (curve, public) = ecdh(r)?;
                ServerKexParams::EcdhePsk {
                    identity_hint,
                    curve,
                    public,
                }
            }
            KexAlgo::SrpSha => ServerKexParams::Srp {
                n: r.vec16()?.to_vec(),
                g: r.vec16()?.to_vec(),
                salt: r.vec8()?.to_vec(),
                public_b: r.vec16()?.to_vec(),
            },
            KexAlgo::Rsa => {
                return Err(TlsError::UnexpectedMessage(
                    "ServerKeyExchange with RSA key exchange".into(),
                ))
            }
        })
    }
}

fn put_dh(out: &mut Vec<u8>, p: &[u8], g: &[u8], public: &[u8]) {
    put_vec16(out, p);
    put_vec16(out, g);
    put_vec16(out, public);
}

fn put_ecdh(out: &mut Vec<u8>, curve: EccCurveId, public: &[u8]) {
    out.push(NAMED_CURVE);
    put_u16(out, curve.tls_code());
    put_vec8(out, public);
}

fn dh(r: &mut Reader<'_>) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), TlsError> {
    Ok((
        r.vec16()?.to_vec(),
        r.vec16()?.to_vec(),
        r.vec16()?.to_vec(),
    ))
}

fn ecdh(r: &mut Reader<'_>) -> Result<(EccCurveId, Vec<u8>), TlsError> {
    let curve_type = r.u8()?;
    if curve_type != NAMED_CURVE {
        return Err(TlsError::HandshakeFailed(format!(
            "server sent unsupported curve type {curve_type}"
        )));
    }
    let code = r.u16()?;
    let curve = EccCurveId::from_tls_code(code).ok_or_else(|| {
        TlsError::IllegalParameter(format!("server chose unknown curve {code}"))
    })?;
    let public = r.vec8()?.to_vec();
    if public.is_empty() {
        return Err(TlsError::DecodeError("empty ECDH public value".into()));
    }
    Ok((curve, public))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: ServerKexParams,
    /// Scheme of the signature, TLS 1.2 only.
    pub scheme: Option<SignatureScheme>,
    /// Empty for anonymous and PSK suites.
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = self.params.encode();
        if let Some(scheme) = self.scheme {
            put_u16(&mut out, scheme.0);
        }
        if self.scheme.is_some() || !self.signature.is_empty() {
            put_vec16(&mut out, &self.signature);
        }
        out
    }

    pub fn decode(
        body: &[u8],
        version: ProtocolVersion,
        suite: &CipherSuiteInfo,
    ) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "ServerKeyExchange");
        let params = ServerKexParams::decode(&mut r, suite.kex)?;
        let (scheme, signature) = if suite.sig.is_some() {
            let scheme = if version.supports_negotiable_signature_algorithms() {
                Some(SignatureScheme(r.u16()?))
            } else {
                None
            };
            (scheme, r.vec16()?.to_vec())
        } else {
            (None, Vec::new())
        };
        r.finish()?;
        Ok(Self {
            params,
            scheme,
            signature,
        })
    }
}

/// The client's half of the key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    /// RSA-encrypted pre-master secret.
    Rsa(Vec<u8>),
    Dh(Vec<u8>),
    Ecdh(Vec<u8>),
    Psk {
        identity: String,
    },
    DhePsk {
        identity: String,
        public: Vec<u8>,
    },
    EcdhePsk {
        identity: String,
        public: Vec<u8>,
    },
    Srp(Vec<u8>),
}

impl ClientKeyExchange {
    /// SSLv3 sends the RSA ciphertext without a length prefix.
    pub fn encode_body(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            ClientKeyExchange::Rsa(ct) if version == ProtocolVersion::SSL_V3 => {
                out.extend_from_slice(ct)
            }
            ClientKeyExchange::Rsa(ct) => put_vec16(&mut out, ct),
            ClientKeyExchange::Dh(public) | ClientKeyExchange::Srp(public) => {
                put_vec16(&mut out, public)
            }
            ClientKeyExchange::Ecdh(public) => put_vec8(&mut out, public),
            ClientKeyExchange::Psk { identity } => put_vec16(&mut out, identity.as_bytes()),
            ClientKeyExchange::DhePsk { identity, public } => {
                put_vec16(&mut out, identity.as_bytes());
                put_vec16(&mut out, public);
            }
            ClientKeyExchange::EcdhePsk { identity, public } => {
                put_vec16(&mut out, identity.as_bytes());
                put_vec8(&mut out, public);
            }
        }
        out
    }

    pub fn decode(
        body: &[u8],
        version: ProtocolVersion,
        suite: &CipherSuiteInfo,
    ) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "ClientKeyExchange");
        let cke = match suite.kex {
            KexAlgo::Rsa if version == ProtocolVersion::SSL_V3 => {
                ClientKeyExchange::Rsa(r.rest().to_vec())
            }
            KexAlgo::Rsa => ClientKeyExchange::Rsa(r.vec16()?.to_vec()),
            KexAlgo::Dh => ClientKeyExchange::Dh(r.vec16()?.to_vec()),
            KexAlgo::Ecdh => ClientKeyExchange::Ecdh(r.vec8()?.to_vec()),
            KexAlgo::Psk => ClientKeyExchange::Psk {
                identity: utf8(r.vec16()?, "PSK identity")?,
            },
            KexAlgo::DhePsk => ClientKeyExchange::DhePsk {
                identity: utf8(r.vec16()?, "PSK identity")?,
                public: r.vec16()?.to_vec(),
            },
            KexAlgo::EcdhePsk => ClientKeyExchange::EcdhePsk {
                identity: utf8(r.vec16()?, "PSK identity")?,
                public: r.vec8()?.to_vec(),
            },
            KexAlgo::SrpSha => ClientKeyExchange::Srp(r.vec16()?.to_vec()),
        };
        r.finish()?;
        Ok(cke)
    }
}

// ---------------------------------------------------------------------------
// Authentication and finishing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    /// TLS 1.2 only.
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.signature.len() + 4);
        if let Some(scheme) = self.scheme {
            put_u16(&mut out, scheme.0);
        }
        put_vec16(&mut out, &self.signature);
        out
    }

    pub fn decode(body: &[u8], version: ProtocolVersion) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "CertificateVerify");
        let scheme = if version.supports_negotiable_signature_algorithms() {
            Some(SignatureScheme(r.u16()?))
        } else {
            None
        };
        let signature = r.vec16()?.to_vec();
        r.finish()?;
        Ok(Self { scheme, signature })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    pub lifetime_hint: u32,
    /// Empty when the server declines to issue a ticket.
    pub ticket: Vec<u8>,
}

impl NewSessionTicket {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ticket.len() + 6);
        out.extend_from_slice(&self.lifetime_hint.to_be_bytes());
        put_vec16(&mut out, &self.ticket);
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body, "NewSessionTicket");
        let lifetime_hint = r.u32()?;
        let ticket = r.vec16()?.to_vec();
        r.finish()?;
        Ok(Self {
            lifetime_hint,
            ticket,
        })
    }
}

/// Encrypted-handshake NextProtocol message: the protocol followed by
/// padding that rounds the body to a multiple of 32 bytes.
pub fn encode_next_protocol(protocol: &str) -> Vec<u8> {
    let padding_len = 32 - ((protocol.len() + 2) % 32);
    let mut out = Vec::with_capacity(protocol.len() + padding_len + 2);
    put_vec8(&mut out, protocol.as_bytes());
    put_vec8(&mut out, &vec![0u8; padding_len]);
    out
}

pub fn decode_next_protocol(body: &[u8]) -> Result<String, TlsError> {
    let mut r = Reader::new(body, "NextProtocol");
    let protocol = utf8(r.vec8()?, "next protocol")?;
    r.vec8()?;
    r.finish()?;
    Ok(protocol)
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, TlsError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TlsError::DecodeError(format!("{what} is not UTF-8")))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// One decoded handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    NewSessionTicket(NewSessionTicket),
    Certificate(Vec<Certificate>),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Vec<u8>),
    NextProtocol(String),
    ChangeCipherSpec,
}

impl HandshakeMessage {
    /// Decode a body of type `ty`. Key exchange messages are only
    /// meaningful once a suite is negotiated; without one they are
    /// unexpected.
    pub fn decode(
        ty: HandshakeType,
        body: &[u8],
        version: ProtocolVersion,
        suite: Option<&CipherSuiteInfo>,
    ) -> Result<Self, TlsError> {
        let need_suite = || {
            suite.ok_or_else(|| {
                TlsError::UnexpectedMessage(format!("{ty:?} before a suite was negotiated"))
            })
        };
        Ok(match ty {
            HandshakeType::HelloRequest => {
                empty(body, "HelloRequest")?;
                HandshakeMessage::HelloRequest
            }
            HandshakeType::ClientHello => HandshakeMessage::ClientHello(ClientHello::decode(body)?),
            HandshakeType::ClientHelloSslv2 => {
                HandshakeMessage::ClientHello(ClientHello::decode_sslv2(body)?)
            }
            HandshakeType::ServerHello => HandshakeMessage::ServerHello(ServerHello::decode(body)?),
            HandshakeType::NewSessionTicket => {
                HandshakeMessage::NewSessionTicket(NewSessionTicket::decode(body)?)
            }
            HandshakeType::Certificate => HandshakeMessage::Certificate(decode_certificate(body)?),
            HandshakeType::ServerKeyExchange => HandshakeMessage::ServerKeyExchange(
                ServerKeyExchange::decode(body, version, need_suite()?)?,
            ),
            HandshakeType::CertificateRequest => {
                HandshakeMessage::CertificateRequest(CertificateRequest::decode(body, version)?)
            }
            HandshakeType::ServerHelloDone => {
                empty(body, "ServerHelloDone")?;
                HandshakeMessage::ServerHelloDone
            }
            HandshakeType::CertificateVerify => {
                HandshakeMessage::CertificateVerify(CertificateVerify::decode(body, version)?)
            }
            HandshakeType::ClientKeyExchange => HandshakeMessage::ClientKeyExchange(
                ClientKeyExchange::decode(body, version, need_suite()?)?,
            ),
            HandshakeType::Finished => HandshakeMessage::Finished(body.to_vec()),
            HandshakeType::NextProtocol => {
                HandshakeMessage::NextProtocol(decode_next_protocol(body)?)
            }
            HandshakeType::HandshakeCcs => HandshakeMessage::ChangeCipherSpec,
        })
    }

    pub fn msg_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::HelloRequest => HandshakeType::HelloRequest,
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::NewSessionTicket(_) => HandshakeType::NewSessionTicket,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakeMessage::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeMessage::Finished(_) => HandshakeType::Finished,
            HandshakeMessage::NextProtocol(_) => HandshakeType::NextProtocol,
            HandshakeMessage::ChangeCipherSpec => HandshakeType::HandshakeCcs,
        }
    }

    /// Serialize the body. ChangeCipherSpec travels in its own record
    /// type and has no handshake body.
    pub fn encode_body(&self, version: ProtocolVersion) -> Result<Vec<u8>, TlsError> {
        Ok(match self {
            HandshakeMessage::HelloRequest | HandshakeMessage::ServerHelloDone => Vec::new(),
            HandshakeMessage::ClientHello(ch) => ch.encode_body()?,
            HandshakeMessage::ServerHello(sh) => sh.encode_body()?,
            HandshakeMessage::NewSessionTicket(nst) => nst.encode_body(),
            HandshakeMessage::Certificate(chain) => encode_certificate(chain),
            HandshakeMessage::ServerKeyExchange(ske) => ske.encode_body(),
            HandshakeMessage::CertificateRequest(cr) => cr.encode_body(version),
            HandshakeMessage::CertificateVerify(cv) => cv.encode_body(),
            HandshakeMessage::ClientKeyExchange(cke) => cke.encode_body(version),
            HandshakeMessage::Finished(verify_data) => verify_data.clone(),
            HandshakeMessage::NextProtocol(protocol) => encode_next_protocol(protocol),
            HandshakeMessage::ChangeCipherSpec => {
                return Err(TlsError::InternalError(
                    "ChangeCipherSpec has no handshake encoding".into(),
                ))
            }
        })
    }

    /// Serialize with the 4-byte handshake header.
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, TlsError> {
        let body = self.encode_body(version)?;
        let mut out = Vec::with_capacity(body.len() + 4);
        out.push(self.msg_type() as u8);
        put_u24(&mut out, body.len());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn empty(body: &[u8], what: &'static str) -> Result<(), TlsError> {
    Reader::new(body, what).finish()
}
