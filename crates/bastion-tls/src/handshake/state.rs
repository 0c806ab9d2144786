//! Per-handshake state: transcript, message automaton, and the values
//! negotiated so far.

use bastion_types::TlsError;
use zeroize::Zeroize;

use super::codec::wrap_handshake;
use super::messages::{
    CertificateRequest, CertificateVerify, ClientHello, ClientKeyExchange, HandshakeMessage,
    NewSessionTicket, ServerHello, ServerKeyExchange,
};
use super::reassembly::HandshakeReader;
use super::{HandshakeType, HandshakeTypeSet};
use crate::credentials::Certificate;
use crate::crypt::ciphersuite::CipherSuiteInfo;
use crate::crypt::kex::{DhKeyExchange, EcdhKeyExchange, SrpServerSession};
use crate::crypt::key_schedule::{compute_verify_data, SessionKeys};
use crate::crypt::random::RandomSource;
use crate::crypt::signature::{
    sign_digest, sign_message, verify_digest, verify_message, PrivateKey, PublicKey,
    SignatureHash,
};
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::SignatureScheme;
use crate::record::{ContentType, RecordWriter};
use crate::session::Session;
use crate::{ProtocolVersion, TlsRole};

/// The server's ephemeral secret between ServerKeyExchange and
/// ClientKeyExchange.
pub enum KexSecret {
    Dh(DhKeyExchange),
    Ecdh(EcdhKeyExchange),
    Srp(SrpServerSession),
}

/// State of one handshake attempt. Dropped when the handshake completes
/// or the connection fails.
pub struct HandshakeState {
    role: TlsRole,
    version: ProtocolVersion,
    pub(crate) reader: HandshakeReader,
    transcript: TranscriptHash,
    expected: HandshakeTypeSet,
    received: HandshakeTypeSet,

    pub client_hello: Option<ClientHello>,
    pub server_hello: Option<ServerHello>,
    pub server_certs: Option<Vec<Certificate>>,
    pub server_kex: Option<ServerKeyExchange>,
    pub cert_req: Option<CertificateRequest>,
    pub client_certs: Option<Vec<Certificate>>,
    pub client_kex: Option<ClientKeyExchange>,
    pub new_session_ticket: Option<NewSessionTicket>,
    pub client_finished: Option<Vec<u8>>,
    pub server_finished: Option<Vec<u8>>,
    pub next_protocol: Option<String>,

    suite: Option<&'static CipherSuiteInfo>,
    keys: Option<SessionKeys>,
    /// Master secret of the session offered for resumption (client), or
    /// of the session being resumed (server).
    pub resume_master_secret: Option<Vec<u8>>,
    /// Session offered for resumption (client) or being resumed (server).
    pub resumed_session: Option<Session>,
    pub allow_session_resumption: bool,

    pub kex_secret: Option<KexSecret>,
    /// Our signing or decryption key for this handshake.
    pub private_key: Option<PrivateKey>,
    /// Key from the peer's leaf certificate.
    pub peer_public_key: Option<PublicKey>,
    /// Identity the client presented with a PSK or SRP key exchange.
    pub psk_identity: String,
    pub srp_identifier: String,
}

impl HandshakeState {
    pub fn new(role: TlsRole) -> Self {
        Self {
            role,
            version: ProtocolVersion::TLS_V10,
            reader: HandshakeReader::new(),
            transcript: TranscriptHash::new(),
            expected: HandshakeTypeSet::empty(),
            received: HandshakeTypeSet::empty(),
            client_hello: None,
            server_hello: None,
            server_certs: None,
            server_kex: None,
            cert_req: None,
            client_certs: None,
            client_kex: None,
            new_session_ticket: None,
            client_finished: None,
            server_finished: None,
            next_protocol: None,
            suite: None,
            keys: None,
            resume_master_secret: None,
            resumed_session: None,
            allow_session_resumption: true,
            kex_secret: None,
            private_key: None,
            peer_public_key: None,
            psk_identity: String::new(),
            srp_identifier: String::new(),
        }
    }

    pub fn role(&self) -> TlsRole {
        self.role
    }

    // -----------------------------------------------------------------------
    // Message automaton
    // -----------------------------------------------------------------------

    pub fn set_expected_next(&mut self, ty: HandshakeType) {
        self.expected.insert(ty);
    }

    /// Accept `ty` as the next message. It must be in the expected set and
    /// must not have arrived before in this handshake. Clears the expected
    /// set.
    pub fn confirm_transition_to(&mut self, ty: HandshakeType) -> Result<(), TlsError> {
        let ty = match ty {
            HandshakeType::ClientHelloSslv2 => HandshakeType::ClientHello,
            other => other,
        };
        if !self.expected.contains(ty) || self.received.contains(ty) {
            return Err(TlsError::UnexpectedMessage(format!(
                "unexpected {ty:?} in the handshake"
            )));
        }
        log::trace!("{:?} handshake: received {:?}", self.role, ty);
        self.received.insert(ty);
        self.expected.clear();
        Ok(())
    }

    pub fn received_handshake_msg(&self, ty: HandshakeType) -> bool {
        self.received.contains(ty)
    }

    // -----------------------------------------------------------------------
    // Negotiated values
    // -----------------------------------------------------------------------

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn suite(&self) -> Result<&'static CipherSuiteInfo, TlsError> {
        self.suite
            .ok_or_else(|| TlsError::InternalError("no ciphersuite negotiated".into()))
    }

    pub fn set_suite(&mut self, suite: &'static CipherSuiteInfo) {
        self.suite = Some(suite);
    }

    pub fn suite_opt(&self) -> Option<&'static CipherSuiteInfo> {
        self.suite
    }

    pub fn keys(&self) -> Result<&SessionKeys, TlsError> {
        self.keys
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("session keys not derived".into()))
    }

    pub fn client_random(&self) -> Result<&[u8; 32], TlsError> {
        self.client_hello
            .as_ref()
            .map(|ch| &ch.random)
            .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))
    }

    pub fn server_random(&self) -> Result<&[u8; 32], TlsError> {
        self.server_hello
            .as_ref()
            .map(|sh| &sh.random)
            .ok_or_else(|| TlsError::InternalError("no ServerHello".into()))
    }

    pub fn compression_method(&self) -> u8 {
        self.server_hello
            .as_ref()
            .map_or(0, |sh| sh.compression_method)
    }

    /// Derive the session keys from a pre-master secret, or from the saved
    /// master secret when `resuming`.
    pub fn compute_session_keys(&mut self, secret: &[u8], resuming: bool) -> Result<(), TlsError> {
        let suite = self.suite()?;
        let keys = SessionKeys::derive(
            self.version,
            suite,
            secret,
            self.client_random()?,
            self.server_random()?,
            resuming,
        )?;
        self.keys = Some(keys);
        Ok(())
    }

    /// Derive keys from the resumption master secret.
    pub fn compute_resumed_keys(&mut self) -> Result<(), TlsError> {
        let mut master = self
            .resume_master_secret
            .take()
            .ok_or_else(|| TlsError::InternalError("no master secret to resume".into()))?;
        let result = self.compute_session_keys(&master, true);
        master.zeroize();
        result
    }

    // -----------------------------------------------------------------------
    // Transcript
    // -----------------------------------------------------------------------

    pub fn hash(&mut self, ty: HandshakeType, body: &[u8]) {
        self.transcript.update(ty as u8, body);
    }

    pub fn hash_raw(&mut self, data: &[u8]) {
        self.transcript.update_raw(data);
    }

    pub fn transcript(&self) -> &TranscriptHash {
        &self.transcript
    }

    /// Verify data for the Finished sent by `sender`, over the transcript
    /// as it stands.
    pub fn verify_data(&self, sender: TlsRole) -> Result<Vec<u8>, TlsError> {
        compute_verify_data(
            self.version,
            self.suite()?,
            self.keys()?.master_secret(),
            sender,
            &self.transcript,
        )
    }

    // -----------------------------------------------------------------------
    // Client authentication
    // -----------------------------------------------------------------------

    /// Sign the transcript so far for a CertificateVerify. SSLv3 signs its
    /// own MD5/SHA-1 construction keyed with the master secret.
    pub fn sign_certificate_verify(
        &self,
        key: &PrivateKey,
        scheme: Option<SignatureScheme>,
        rng: &dyn RandomSource,
    ) -> Result<CertificateVerify, TlsError> {
        let signature = if self.version == ProtocolVersion::SSL_V3 {
            let hash = SignatureHash::select(self.version, key.algo(), None)?;
            let digest = self
                .transcript
                .final_ssl3(self.keys()?.master_secret(), b"")?;
            sign_digest(key, hash, &digest, rng)?
        } else {
            sign_message(key, self.version, scheme, self.transcript.contents(), rng)?
        };
        Ok(CertificateVerify { scheme, signature })
    }

    /// Check the peer's CertificateVerify against the transcript so far.
    pub fn check_certificate_verify(
        &self,
        key: &PublicKey,
        cv: &CertificateVerify,
    ) -> Result<bool, TlsError> {
        if self.version == ProtocolVersion::SSL_V3 {
            let hash = SignatureHash::select(self.version, key.algo(), None)?;
            let digest = self
                .transcript
                .final_ssl3(self.keys()?.master_secret(), b"")?;
            return Ok(verify_digest(key, hash, &digest, &cv.signature));
        }
        verify_message(
            key,
            self.version,
            cv.scheme,
            self.transcript.contents(),
            &cv.signature,
        )
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Serialize `msg`, add it to the transcript and write it out.
    /// HelloRequest stays out of the transcript (RFC 5246 §7.4.1.1).
    pub fn send(&mut self, writer: &mut RecordWriter, msg: &HandshakeMessage) -> Result<(), TlsError> {
        let ty = msg.msg_type();
        let body = msg.encode_body(self.version)?;
        if ty != HandshakeType::HelloRequest {
            self.transcript.update(ty as u8, &body);
        }
        log::debug!("{:?} handshake: sending {:?}", self.role, ty);
        writer.send(ContentType::Handshake, &wrap_handshake(ty, &body))
    }

    pub fn send_change_cipher_spec(&self, writer: &mut RecordWriter) -> Result<(), TlsError> {
        log::debug!("{:?} handshake: sending ChangeCipherSpec", self.role);
        writer.send(ContentType::ChangeCipherSpec, &[1])
    }

    /// Compute, record and send our Finished.
    pub fn send_finished(&mut self, writer: &mut RecordWriter) -> Result<(), TlsError> {
        let verify_data = self.verify_data(self.role)?;
        match self.role {
            TlsRole::Client => self.client_finished = Some(verify_data.clone()),
            TlsRole::Server => self.server_finished = Some(verify_data.clone()),
        }
        self.send(writer, &HandshakeMessage::Finished(verify_data))
    }
}

impl Drop for HandshakeState {
    fn drop(&mut self) {
        if let Some(m) = self.resume_master_secret.as_mut() {
            m.zeroize();
        }
    }
}

impl std::fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeState")
            .field("role", &self.role)
            .field("version", &self.version)
            .field("expected", &self.expected)
            .field("received", &self.received)
            .field("suite", &self.suite.map(|s| s.name))
            .finish_non_exhaustive()
    }
}
