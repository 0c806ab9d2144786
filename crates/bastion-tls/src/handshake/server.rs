//! Server handshake state machine.
//!
//! ```text
//!                    <--  ClientHello
//! ServerHello [Certificate] [ServerKeyExchange]
//! [CertificateRequest] ServerHelloDone -->
//!                    <--  [Certificate] ClientKeyExchange [CertificateVerify]
//!                         ChangeCipherSpec [NextProtocol] Finished
//! [NewSessionTicket] ChangeCipherSpec Finished -->
//! ```
//!
//! A resumed session sends ServerHello, [NewSessionTicket],
//! ChangeCipherSpec and Finished straight away, then waits for the
//! client's ChangeCipherSpec and Finished.

use bastion_types::TlsError;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::client::as_bad_certificate;
use super::messages::{
    CertificateRequest, CertificateVerify, ClientHello, ClientKeyExchange, HandshakeMessage,
    NewSessionTicket, ServerHello, ServerKexParams, ServerKeyExchange,
};
use super::state::{HandshakeState, KexSecret};
use super::HandshakeType;
use crate::alert::{Alert, AlertDescription};
use crate::channel::{ChannelCore, Endpoint};
use crate::credentials::{session_ticket_key, Certificate};
use crate::crypt::ciphersuite::{CipherSuiteInfo, KexAlgo, SigAlgo};
use crate::crypt::kex::{
    psk_premaster_secret, rsa_decrypt_premaster, DhKeyExchange, EcdhKeyExchange,
    SrpServerSession,
};
use crate::crypt::signature::{choose_scheme, sign_message, PrivateKey};
use crate::crypt::SignatureScheme;
use crate::extensions::{Extension, Extensions};
use crate::session::Session;
use crate::{ProtocolVersion, TlsRole};

/// The server half of a [`Channel`](crate::channel::Channel).
pub struct ServerEndpoint {
    next_protocols: Vec<String>,
}

impl ServerEndpoint {
    pub(crate) fn new(next_protocols: Vec<String>) -> Self {
        Self { next_protocols }
    }

    fn process_client_hello(
        &mut self,
        core: &mut ChannelCore,
        mut state: HandshakeState,
        ch: ClientHello,
    ) -> Result<Option<HandshakeState>, TlsError> {
        let policy = core.policy.clone();

        // RFC 5746 §4.4: refuse to renegotiate with a legacy client.
        if core.secure_renegotiation.renegotiation()
            && !core.secure_renegotiation.supported()
            && policy.require_secure_renegotiation()
        {
            core.send_alert(Alert::warning(AlertDescription::NoRenegotiation))?;
            return Ok(None);
        }
        core.secure_renegotiation.update_client_hello(&ch)?;

        if ch.version < ProtocolVersion::SSL_V3 {
            return Err(TlsError::ProtocolVersion(format!(
                "client offered {}, which we do not support",
                ch.version
            )));
        }
        let version = ch.version.min(policy.pref_version());
        if version < policy.min_version() {
            return Err(TlsError::ProtocolVersion(format!(
                "client version {} is unacceptable by policy",
                ch.version
            )));
        }
        if let Some(active) = core.active_version {
            if version < active {
                return Err(TlsError::ProtocolVersion(format!(
                    "client negotiated {active} then renegotiated with {version}"
                )));
            }
        }

        log::debug!(
            "ClientHello: {}, {} suites, sni {:?}",
            ch.version,
            ch.suites.len(),
            ch.sni_hostname()
        );

        let resumable = if state.allow_session_resumption {
            check_for_resume(core, &ch)
        } else {
            None
        };
        state.client_hello = Some(ch);

        match resumable {
            Some(session) => self.resume_session(core, &mut state, session)?,
            None => self.start_full_handshake(core, &mut state, version)?,
        }
        Ok(Some(state))
    }

    /// Extensions common to both kinds of ServerHello.
    fn server_hello_extensions(
        &self,
        core: &ChannelCore,
        ch: &ClientHello,
        fragment_size: usize,
        offer_ticket: bool,
    ) -> Extensions {
        let mut extensions = Extensions::new();
        if core.secure_renegotiation.supported() {
            extensions.add(Extension::RenegotiationInfo(
                core.secure_renegotiation.for_server_hello(),
            ));
        }
        if fragment_size != 0 {
            extensions.add(Extension::MaxFragmentLength(fragment_size));
        }
        if ch.next_protocol_notification() && !self.next_protocols.is_empty() {
            extensions.add(Extension::NextProtocol(self.next_protocols.clone()));
        }
        if offer_ticket {
            extensions.add(Extension::SessionTicket(Vec::new()));
        }
        if ch.extensions.heartbeat().is_some() && core.policy.negotiate_heartbeat_support() {
            extensions.add(Extension::Heartbeat {
                peer_allowed_to_send: true,
            });
        }
        extensions
    }

    /// Check, send and apply a ServerHello.
    fn send_server_hello(
        &self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        sh: ServerHello,
    ) -> Result<(), TlsError> {
        core.secure_renegotiation.update_server_hello(&sh)?;

        core.writer.set_version(sh.version);
        core.reader.set_version(sh.version);
        if sh.fragment_size() != 0 {
            core.writer.set_maximum_fragment_size(sh.fragment_size());
            core.reader.set_maximum_fragment_size(sh.fragment_size());
        }
        core.heartbeat_negotiated = sh.extensions.heartbeat().is_some();
        core.heartbeat_sending_allowed = state
            .client_hello
            .as_ref()
            .map_or(false, |ch| ch.extensions.heartbeat() == Some(true))
            && core.heartbeat_negotiated;

        state.set_version(sh.version);
        state.send(&mut core.writer, &HandshakeMessage::ServerHello(sh.clone()))?;
        state.server_hello = Some(sh);
        Ok(())
    }

    fn resume_session(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        session: Session,
    ) -> Result<(), TlsError> {
        let suite = CipherSuiteInfo::by_id(session.ciphersuite()).ok_or_else(|| {
            TlsError::InternalError("resumable session has an unknown ciphersuite".into())
        })?;
        let ch = state
            .client_hello
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;
        log::debug!("resuming session, {} with {}", suite.name, session.version());

        let offer_ticket = ch.supports_session_ticket()
            && ch.session_ticket().is_empty()
            && session_ticket_key(core.credentials.as_ref()).is_some();
        let extensions =
            self.server_hello_extensions(core, ch, session.fragment_size(), offer_ticket);
        let sh = ServerHello {
            version: session.version(),
            random: random32(core)?,
            session_id: ch.session_id.clone(),
            suite: session.ciphersuite(),
            compression_method: session.compression_method(),
            extensions,
        };

        state.set_suite(suite);
        self.send_server_hello(core, state, sh)?;
        state.resume_master_secret = Some(session.master_secret().to_vec());
        state.compute_resumed_keys()?;

        let keep = (core.handshake_fn)(&session);
        if !keep {
            core.session_manager.remove_entry(session.session_id());
        }
        if offer_ticket {
            issue_ticket(core, state, &session, keep)?;
        }

        state.send_change_cipher_spec(&mut core.writer)?;
        core.writer
            .activate(TlsRole::Server, suite, state.keys()?, state.compression_method())?;
        state.send_finished(&mut core.writer)?;

        state.resumed_session = Some(session);
        state.set_expected_next(HandshakeType::HandshakeCcs);
        Ok(())
    }

    fn start_full_handshake(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        version: ProtocolVersion,
    ) -> Result<(), TlsError> {
        let policy = core.policy.clone();
        let creds = core.credentials.clone();
        let rng = core.rng.clone();

        let (sni, fragment_size, offer_ticket) = {
            let ch = state
                .client_hello
                .as_ref()
                .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;
            (
                ch.sni_hostname().to_string(),
                ch.fragment_size(),
                ch.supports_session_ticket() && session_ticket_key(creds.as_ref()).is_some(),
            )
        };

        let mut cert_hostname = sni.clone();
        let mut cert_chains = server_cert_chains(core, &cert_hostname);
        if cert_chains.is_empty() && !sni.is_empty() {
            cert_hostname.clear();
            cert_chains = server_cert_chains(core, &cert_hostname);
            if !cert_chains.is_empty() {
                core.send_alert(Alert::warning(AlertDescription::UnrecognizedName))?;
            }
        }

        let ch = state
            .client_hello
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;
        let suite = choose_ciphersuite(core, ch, version, &cert_chains, &sni)?;
        log::debug!("chose {} with {}", suite.name, version);

        let extensions = self.server_hello_extensions(core, ch, fragment_size, offer_ticket);
        let sh = ServerHello {
            version,
            random: random32(core)?,
            session_id: rng.random_vec(32)?,
            suite: suite.suite,
            compression_method: choose_compression(core, ch),
            extensions,
        };
        state.set_suite(suite);
        self.send_server_hello(core, state, sh)?;

        // Certificate
        let chain = suite
            .sig
            .and_then(|sig| cert_chains.iter().find(|(s, _)| *s == sig))
            .map(|(_, chain)| chain.clone());
        if let Some(chain) = chain {
            let leaf = chain.first().ok_or_else(|| {
                TlsError::InternalError("credentials returned an empty chain".into())
            })?;
            let key = creds
                .private_key_for(leaf, TlsRole::Server, &cert_hostname)
                .ok_or_else(|| {
                    TlsError::InternalError("no private key for the server certificate".into())
                })?;
            state.send(&mut core.writer, &HandshakeMessage::Certificate(chain))?;
            state.private_key = Some(key);
        }

        // ServerKeyExchange
        if suite.kex != KexAlgo::Rsa {
            if let Some(ske) = self.server_key_exchange(core, state, suite, &sni)? {
                state.send(&mut core.writer, &HandshakeMessage::ServerKeyExchange(ske))?;
            }
        }

        // CertificateRequest
        let authorities = creds.trusted_certificate_authorities(TlsRole::Server, &sni);
        if !authorities.is_empty() && suite.sig.is_some() {
            let cert_types = policy
                .allowed_signature_methods()
                .iter()
                .map(|sig| sig.client_cert_type())
                .collect();
            let schemes = if version.supports_negotiable_signature_algorithms() {
                policy
                    .allowed_signature_methods()
                    .iter()
                    .flat_map(|sig| {
                        policy
                            .allowed_signature_hashes()
                            .iter()
                            .map(move |h| SignatureScheme::new(*h, *sig))
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let cr = CertificateRequest {
                cert_types,
                schemes,
                authorities,
            };
            state.send(&mut core.writer, &HandshakeMessage::CertificateRequest(cr.clone()))?;
            state.cert_req = Some(cr);
            state.set_expected_next(HandshakeType::Certificate);
        }

        state.set_expected_next(HandshakeType::ClientKeyExchange);
        state.send(&mut core.writer, &HandshakeMessage::ServerHelloDone)?;
        Ok(())
    }

    /// Build the ServerKeyExchange for `suite`, keeping our ephemeral
    /// secret in the state. `None` for PSK without an identity hint.
    fn server_key_exchange(
        &self,
        core: &ChannelCore,
        state: &mut HandshakeState,
        suite: &CipherSuiteInfo,
        sni: &str,
    ) -> Result<Option<ServerKeyExchange>, TlsError> {
        let policy = &core.policy;
        let creds = core.credentials.as_ref();
        let rng = core.rng.as_ref();
        let ch = state
            .client_hello
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;

        let shared_curve = || {
            policy.choose_curve(ch.supported_curves()).ok_or_else(|| {
                TlsError::HandshakeFailed("no ECC curve shared with the client".into())
            })
        };
        let hint = || creds.psk_identity_hint(TlsRole::Server, "tls-server");

        let (params, secret) = match suite.kex {
            KexAlgo::Rsa => return Ok(None),
            KexAlgo::Dh => {
                let kx = DhKeyExchange::generate(policy.dh_group(), rng)?;
                let params = ServerKexParams::Dh {
                    p: kx.group().p_bytes(),
                    g: kx.group().g_bytes(),
                    public: kx.public_key_bytes().to_vec(),
                };
                (params, Some(KexSecret::Dh(kx)))
            }
            KexAlgo::Ecdh => {
                let kx = EcdhKeyExchange::generate(shared_curve()?, rng)?;
                let params = ServerKexParams::Ecdh {
                    curve: kx.curve(),
                    public: kx.public_key_bytes().to_vec(),
                };
                (params, Some(KexSecret::Ecdh(kx)))
            }
            KexAlgo::Psk => {
                let identity_hint = hint();
                if identity_hint.is_empty() {
                    return Ok(None);
                }
                (ServerKexParams::Psk { identity_hint }, None)
            }
            KexAlgo::DhePsk => {
                let kx = DhKeyExchange::generate(policy.dh_group(), rng)?;
                let params = ServerKexParams::DhePsk {
                    identity_hint: hint(),
                    p: kx.group().p_bytes(),
                    g: kx.group().g_bytes(),
                    public: kx.public_key_bytes().to_vec(),
                };
                (params, Some(KexSecret::Dh(kx)))
            }
            KexAlgo::EcdhePsk => {
                let kx = EcdhKeyExchange::generate(shared_curve()?, rng)?;
                let params = ServerKexParams::EcdhePsk {
                    identity_hint: hint(),
                    curve: kx.curve(),
                    public: kx.public_key_bytes().to_vec(),
                };
                (params, Some(KexSecret::Ecdh(kx)))
            }
            KexAlgo::SrpSha => {
                let identifier = ch.srp_identifier().to_string();
                let verifier = creds
                    .srp_verifier(TlsRole::Server, sni, &identifier)
                    .ok_or_else(|| {
                        TlsError::UnknownPskIdentity(format!(
                            "unknown SRP identifier {identifier:?}"
                        ))
                    })?;
                let srp = SrpServerSession::new(verifier.group.clone(), &verifier.verifier, rng)?;
                let params = ServerKexParams::Srp {
                    n: verifier.group.p_bytes(),
                    g: verifier.group.g_bytes(),
                    salt: verifier.salt.clone(),
                    public_b: srp.public_b(),
                };
                state.srp_identifier = identifier;
                (params, Some(KexSecret::Srp(srp)))
            }
        };

        let (scheme, signature) = match suite.sig {
            Some(_) => {
                let key = state.private_key.as_ref().ok_or_else(|| {
                    TlsError::InternalError("signed key exchange without a private key".into())
                })?;
                let ch = state
                    .client_hello
                    .as_ref()
                    .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;
                let scheme = signature_scheme_for(core, key, state.version(), ch.signature_schemes())?;
                let mut signed = Vec::with_capacity(64 + 256);
                signed.extend_from_slice(state.client_random()?);
                signed.extend_from_slice(state.server_random()?);
                signed.extend_from_slice(&params.encode());
                let signature = sign_message(key, state.version(), scheme, &signed, rng)?;
                (scheme, signature)
            }
            None => (None, Vec::new()),
        };

        state.kex_secret = secret;
        Ok(Some(ServerKeyExchange {
            params,
            scheme,
            signature,
        }))
    }

    fn process_client_certificate(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        chain: Vec<Certificate>,
    ) -> Result<(), TlsError> {
        state.set_expected_next(HandshakeType::ClientKeyExchange);
        if let Some(leaf) = chain.first() {
            let key = core
                .credentials
                .subject_public_key(leaf)
                .map_err(as_bad_certificate)?;
            state.peer_public_key = Some(key);
        }
        state.client_certs = Some(chain);
        Ok(())
    }

    /// The pre-master secret for the client's key exchange.
    fn premaster_secret(
        &self,
        core: &ChannelCore,
        state: &mut HandshakeState,
        cke: &ClientKeyExchange,
    ) -> Result<Vec<u8>, TlsError> {
        let creds = core.credentials.as_ref();
        let psk_for = |identity: &str| {
            creds.psk(TlsRole::Server, "tls-server", identity)
        };
        let kex_secret = state.kex_secret.take();

        let pms = match (cke, kex_secret.as_ref()) {
            (ClientKeyExchange::Rsa(ct), _) => {
                let key = match state.private_key.as_ref() {
                    Some(PrivateKey::Rsa(k)) => k,
                    _ => {
                        return Err(TlsError::InternalError(
                            "RSA key exchange without an RSA private key".into(),
                        ))
                    }
                };
                let client_version = state
                    .client_hello
                    .as_ref()
                    .map_or(state.version(), |ch| ch.version);
                rsa_decrypt_premaster(key, ct, client_version, core.rng.as_ref())?
            }
            (ClientKeyExchange::Dh(public), Some(KexSecret::Dh(kx))) => {
                kx.compute_shared_secret(public)?
            }
            (ClientKeyExchange::Ecdh(public), Some(KexSecret::Ecdh(kx))) => {
                kx.compute_shared_secret(public)?
            }
            (ClientKeyExchange::Psk { identity }, None) => {
                let mut psk = psk_for(identity)?;
                let pms = psk_premaster_secret(None, &psk);
                psk.zeroize();
                state.psk_identity = identity.clone();
                pms
            }
            (ClientKeyExchange::DhePsk { identity, public }, Some(KexSecret::Dh(kx))) => {
                let mut psk = psk_for(identity)?;
                let mut dh_secret = kx.compute_shared_secret(public)?;
                let pms = psk_premaster_secret(Some(&dh_secret), &psk);
                psk.zeroize();
                dh_secret.zeroize();
                state.psk_identity = identity.clone();
                pms
            }
            (ClientKeyExchange::EcdhePsk { identity, public }, Some(KexSecret::Ecdh(kx))) => {
                let mut psk = psk_for(identity)?;
                let mut ecdh_secret = kx.compute_shared_secret(public)?;
                let pms = psk_premaster_secret(Some(&ecdh_secret), &psk);
                psk.zeroize();
                ecdh_secret.zeroize();
                state.psk_identity = identity.clone();
                pms
            }
            (ClientKeyExchange::Srp(a), Some(KexSecret::Srp(srp))) => {
                srp.compute_shared_secret(a)?
            }
            _ => {
                return Err(TlsError::InternalError(
                    "client key exchange does not match our parameters".into(),
                ))
            }
        };
        Ok(pms)
    }

    fn process_client_key_exchange(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        cke: ClientKeyExchange,
    ) -> Result<(), TlsError> {
        let mut pms = self.premaster_secret(core, state, &cke)?;
        let derived = state.compute_session_keys(&pms, false);
        pms.zeroize();
        derived?;
        state.client_kex = Some(cke);

        let client_sent_cert = state
            .client_certs
            .as_ref()
            .map_or(false, |chain| !chain.is_empty());
        if client_sent_cert {
            state.set_expected_next(HandshakeType::CertificateVerify);
        } else {
            state.set_expected_next(HandshakeType::HandshakeCcs);
        }
        Ok(())
    }

    fn process_certificate_verify(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        cv: CertificateVerify,
        body: &[u8],
    ) -> Result<(), TlsError> {
        let key = state.peer_public_key.as_ref().ok_or_else(|| {
            TlsError::InternalError("CertificateVerify without a client key".into())
        })?;
        if let Some(scheme) = cv.scheme {
            let requested = state
                .cert_req
                .as_ref()
                .map_or(false, |cr| cr.schemes.contains(&scheme));
            if !requested {
                return Err(TlsError::IllegalParameter(format!(
                    "client signed with scheme {:#06x}, which we did not request",
                    scheme.0
                )));
            }
        }
        // The signature covers the transcript before this message.
        let valid = state.check_certificate_verify(key, &cv)?;
        state.hash(HandshakeType::CertificateVerify, body);
        if !valid {
            return Err(TlsError::DecryptError(
                "client certificate verify failed".into(),
            ));
        }

        let sni = state
            .client_hello
            .as_ref()
            .map(|ch| ch.sni_hostname().to_string())
            .unwrap_or_default();
        let chain = state.client_certs.as_deref().unwrap_or(&[]);
        core.credentials
            .verify_certificate_chain(TlsRole::Server, &sni, chain)
            .map_err(as_bad_certificate)?;

        state.set_expected_next(HandshakeType::HandshakeCcs);
        Ok(())
    }

    fn process_finished(
        &mut self,
        core: &mut ChannelCore,
        mut state: HandshakeState,
        verify_data: &[u8],
    ) -> Result<Option<HandshakeState>, TlsError> {
        let expected = state.verify_data(TlsRole::Client)?;
        if !bool::from(verify_data.ct_eq(&expected)) {
            return Err(TlsError::DecryptError("client Finished did not verify".into()));
        }
        state.client_finished = Some(verify_data.to_vec());

        // Full handshake: our flight follows the client's.
        if state.server_finished.is_none() {
            state.hash(HandshakeType::Finished, verify_data);

            let session = build_session(core, &state)?;
            let keep = (core.handshake_fn)(&session);
            let ticket_negotiated = state
                .server_hello
                .as_ref()
                .map_or(false, |sh| sh.supports_session_ticket());
            if ticket_negotiated {
                issue_ticket(core, &mut state, &session, keep)?;
            } else if keep {
                core.session_manager.save(&session);
            }

            let suite = state.suite()?;
            state.send_change_cipher_spec(&mut core.writer)?;
            core.writer
                .activate(TlsRole::Server, suite, state.keys()?, state.compression_method())?;
            state.send_finished(&mut core.writer)?;
        }

        if let (Some(c), Some(s)) = (state.client_finished.as_ref(), state.server_finished.as_ref()) {
            core.secure_renegotiation.update_finished(c, s);
        }
        core.peer_certs = match (state.client_certs.take(), state.resumed_session.as_ref()) {
            (Some(chain), _) => chain,
            (None, Some(session)) => session.peer_certs().to_vec(),
            (None, None) => Vec::new(),
        };
        core.next_protocol = state.next_protocol.take().unwrap_or_default();
        core.handshake_complete(state.version());
        Ok(None)
    }
}

impl Endpoint for ServerEndpoint {
    const ROLE: TlsRole = TlsRole::Server;

    fn new_handshake_state(&self, core: &ChannelCore) -> HandshakeState {
        let mut state = HandshakeState::new(TlsRole::Server);
        state.set_version(core.writer.version());
        state.set_expected_next(HandshakeType::ClientHello);
        state
    }

    fn process_handshake_msg(
        &mut self,
        core: &mut ChannelCore,
        mut state: HandshakeState,
        ty: HandshakeType,
        body: &[u8],
    ) -> Result<Option<HandshakeState>, TlsError> {
        state.confirm_transition_to(ty)?;
        let msg = HandshakeMessage::decode(ty, body, state.version(), state.suite_opt())?;
        match ty {
            // The SSLv2 hello is hashed as sent, without a handshake header.
            HandshakeType::ClientHelloSslv2 => state.hash_raw(body),
            HandshakeType::HandshakeCcs
            | HandshakeType::Finished
            | HandshakeType::CertificateVerify => {}
            _ => state.hash(ty, body),
        }

        match msg {
            HandshakeMessage::ClientHello(ch) => {
                return self.process_client_hello(core, state, ch);
            }
            HandshakeMessage::Certificate(chain) => {
                self.process_client_certificate(core, &mut state, chain)?
            }
            HandshakeMessage::ClientKeyExchange(cke) => {
                self.process_client_key_exchange(core, &mut state, cke)?
            }
            HandshakeMessage::CertificateVerify(cv) => {
                self.process_certificate_verify(core, &mut state, cv, body)?
            }
            HandshakeMessage::ChangeCipherSpec => {
                let suite = state.suite()?;
                core.reader
                    .activate(TlsRole::Server, suite, state.keys()?, state.compression_method())?;
                let npn = state
                    .server_hello
                    .as_ref()
                    .map_or(false, |sh| sh.next_protocol_notification());
                if npn {
                    state.set_expected_next(HandshakeType::NextProtocol);
                } else {
                    state.set_expected_next(HandshakeType::Finished);
                }
            }
            HandshakeMessage::NextProtocol(protocol) => {
                log::debug!("client selected next protocol {protocol:?}");
                state.next_protocol = Some(protocol);
                state.set_expected_next(HandshakeType::Finished);
            }
            HandshakeMessage::Finished(verify_data) => {
                return self.process_finished(core, state, &verify_data);
            }
            other => {
                return Err(TlsError::UnexpectedMessage(format!(
                    "server cannot process {:?}",
                    other.msg_type()
                )))
            }
        }
        Ok(Some(state))
    }

    /// Ask the client for a new handshake with a HelloRequest.
    fn renegotiate(&mut self, core: &mut ChannelCore, force_full: bool) -> Result<(), TlsError> {
        let mut state = self.new_handshake_state(core);
        state.allow_session_resumption = !force_full;
        state.send(&mut core.writer, &HandshakeMessage::HelloRequest)?;
        core.state = Some(state);
        Ok(())
    }
}

impl std::fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("next_protocols", &self.next_protocols)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Negotiation helpers
// ---------------------------------------------------------------------------

fn random32(core: &ChannelCore) -> Result<[u8; 32], TlsError> {
    let mut random = [0u8; 32];
    core.rng.fill(&mut random)?;
    Ok(random)
}

/// A session the client may resume: found by ticket or by id, created by
/// a server, and matching the hello in version, suite, compression, SRP
/// identity and server name.
fn check_for_resume(core: &ChannelCore, ch: &ClientHello) -> Option<Session> {
    let session = if ch.session_ticket().is_empty() {
        if ch.session_id.is_empty() {
            return None;
        }
        core.session_manager.load_from_session_id(&ch.session_id)?
    } else {
        // A ticket overrides the session id.
        let key = session_ticket_key(core.credentials.as_ref())?;
        let session = Session::decrypt(ch.session_ticket(), &key)?;
        let lifetime = u64::from(core.policy.session_ticket_lifetime());
        if lifetime != 0 && session.session_age() > lifetime {
            log::debug!("session ticket expired");
            return None;
        }
        session
    };

    let policy = &core.policy;
    let matches = session.side() == TlsRole::Server
        && ch.version == session.version()
        && session.version() >= policy.min_version()
        && session.version() <= policy.pref_version()
        && ch.offered_suite(session.ciphersuite())
        && ch.compression_methods.contains(&session.compression_method())
        && (ch.srp_identifier().is_empty() || ch.srp_identifier() == session.srp_identifier())
        && (ch.sni_hostname().is_empty() || ch.sni_hostname() == session.sni_hostname());
    if matches {
        Some(session)
    } else {
        log::debug!("session offered by client does not match its hello");
        None
    }
}

/// Our certificate chains for `hostname`, one per allowed signature type.
fn server_cert_chains(core: &ChannelCore, hostname: &str) -> Vec<(SigAlgo, Vec<Certificate>)> {
    core.policy
        .allowed_signature_methods()
        .iter()
        .filter_map(|sig| {
            let chain = core
                .credentials
                .cert_chain_single_type(*sig, TlsRole::Server, hostname);
            (!chain.is_empty()).then_some((*sig, chain))
        })
        .collect()
}

/// Our most preferred suite that the client offered, that works in
/// `version`, and that we hold credentials for.
fn choose_ciphersuite(
    core: &ChannelCore,
    ch: &ClientHello,
    version: ProtocolVersion,
    cert_chains: &[(SigAlgo, Vec<Certificate>)],
    sni: &str,
) -> Result<&'static CipherSuiteInfo, TlsError> {
    let have_srp = core.credentials.attempt_srp(TlsRole::Server, sni);
    let server_suites = core.policy.ciphersuite_list(have_srp);
    if server_suites.is_empty() {
        return Err(TlsError::InternalError(
            "policy forbids every ciphersuite".into(),
        ));
    }
    let have_shared_curve = core.policy.choose_curve(ch.supported_curves()).is_some();

    for id in server_suites {
        if !ch.offered_suite(id) {
            continue;
        }
        let Some(suite) = CipherSuiteInfo::by_id(id) else {
            continue;
        };
        if !suite.usable_in(version) {
            continue;
        }
        if suite.is_ecc() && !have_shared_curve {
            continue;
        }
        if let Some(sig) = suite.sig {
            if !cert_chains.iter().any(|(s, _)| *s == sig) {
                continue;
            }
        }
        if suite.kex == KexAlgo::SrpSha && ch.srp_identifier().is_empty() {
            return Err(TlsError::UnknownPskIdentity(
                "client wanted SRP but did not send an identifier".into(),
            ));
        }
        return Ok(suite);
    }
    Err(TlsError::HandshakeFailed(
        "cannot agree on a ciphersuite with the client".into(),
    ))
}

/// Our first allowed compression method that the client offered.
fn choose_compression(core: &ChannelCore, ch: &ClientHello) -> u8 {
    core.policy
        .compression()
        .iter()
        .copied()
        .find(|m| ch.compression_methods.contains(m))
        .unwrap_or(0)
}

/// The TLS 1.2 scheme to sign with, or `None` before TLS 1.2.
fn signature_scheme_for(
    core: &ChannelCore,
    key: &PrivateKey,
    version: ProtocolVersion,
    peer_offered: &[SignatureScheme],
) -> Result<Option<SignatureScheme>, TlsError> {
    if !version.supports_negotiable_signature_algorithms() {
        return Ok(None);
    }
    choose_scheme(key.algo(), core.policy.allowed_signature_hashes(), peer_offered)
        .map(Some)
        .ok_or_else(|| TlsError::HandshakeFailed("no signature scheme shared with the client".into()))
}

fn build_session(core: &ChannelCore, state: &HandshakeState) -> Result<Session, TlsError> {
    let ch = state
        .client_hello
        .as_ref()
        .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;
    let sh = state
        .server_hello
        .as_ref()
        .ok_or_else(|| TlsError::InternalError("no ServerHello".into()))?;
    Ok(Session::new(
        sh.session_id.clone(),
        state.keys()?.master_secret().to_vec(),
        sh.version,
        sh.suite,
        sh.compression_method,
        TlsRole::Server,
        core.secure_renegotiation.supported(),
        ch.fragment_size(),
        state.client_certs.clone().unwrap_or_default(),
        Vec::new(),
        ch.sni_hostname().to_string(),
        state.srp_identifier.clone(),
    ))
}

/// Send a NewSessionTicket. A session we do not keep, or one we fail to
/// seal, gets an empty ticket instead.
fn issue_ticket(
    core: &mut ChannelCore,
    state: &mut HandshakeState,
    session: &Session,
    keep: bool,
) -> Result<(), TlsError> {
    let sealed = if keep {
        session_ticket_key(core.credentials.as_ref()).and_then(|key| {
            session
                .encrypt(&key, core.rng.as_ref())
                .map_err(|e| log::warn!("could not seal session ticket: {e}"))
                .ok()
        })
    } else {
        None
    };
    let nst = match sealed {
        Some(ticket) => NewSessionTicket {
            lifetime_hint: core.policy.session_ticket_lifetime(),
            ticket,
        },
        None => NewSessionTicket {
            lifetime_hint: 0,
            ticket: Vec::new(),
        },
    };
    state.send(&mut core.writer, &HandshakeMessage::NewSessionTicket(nst))
}
