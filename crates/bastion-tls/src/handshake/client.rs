//! Client handshake state machine.
//!
//! ```text
//! ClientHello        -->
//!                    <--  ServerHello
//!                         [Certificate] [ServerKeyExchange]
//!                         [CertificateRequest] ServerHelloDone
//! [Certificate] ClientKeyExchange [CertificateVerify]
//! ChangeCipherSpec [NextProtocol] Finished -->
//!                    <--  [NewSessionTicket] ChangeCipherSpec Finished
//! ```
//!
//! When the server echoes the session id we offered, the exchange is
//! abbreviated: ServerHello, [NewSessionTicket], ChangeCipherSpec and
//! Finished from the server, then our ChangeCipherSpec and Finished.

use bastion_types::{EccCurveId, TlsError};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::messages::{
    ClientHello, ClientKeyExchange, HandshakeMessage, ServerHello, ServerKexParams,
    ServerKeyExchange,
};
use super::state::HandshakeState;
use super::HandshakeType;
use crate::alert::{Alert, AlertDescription};
use crate::channel::{ChannelCore, Endpoint, NextProtocolFn};
use crate::credentials::Certificate;
use crate::crypt::ciphersuite::{CipherSuiteInfo, KexAlgo, SigAlgo};
use crate::crypt::kex::{
    psk_premaster_secret, rsa_encrypt_premaster, srp6_client_agree, DhGroup, DhKeyExchange,
    EcdhKeyExchange,
};
use crate::crypt::random::RandomSource;
use crate::crypt::signature::{choose_scheme, verify_message, PublicKey};
use crate::crypt::SignatureScheme;
use crate::extensions::{Extension, Extensions};
use crate::session::Session;
use crate::TlsRole;

/// The client half of a [`Channel`](crate::channel::Channel).
pub struct ClientEndpoint {
    hostname: String,
    next_protocol_fn: Option<NextProtocolFn>,
}

impl ClientEndpoint {
    pub(crate) fn new(hostname: &str, next_protocol_fn: Option<NextProtocolFn>) -> Self {
        Self {
            hostname: hostname.to_string(),
            next_protocol_fn,
        }
    }

    /// Send the first ClientHello of the connection.
    pub(crate) fn start(&mut self, core: &mut ChannelCore) -> Result<(), TlsError> {
        let mut state = HandshakeState::new(TlsRole::Client);
        self.send_client_hello(core, &mut state, false)?;
        core.state = Some(state);
        Ok(())
    }

    fn send_client_hello(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        force_full: bool,
    ) -> Result<(), TlsError> {
        let policy = core.policy.clone();
        let creds = core.credentials.clone();

        let srp_identifier = if creds.attempt_srp(TlsRole::Client, &self.hostname) {
            creds.srp_identifier(TlsRole::Client, &self.hostname)
        } else {
            String::new()
        };

        let resumable = if force_full || !state.allow_session_resumption {
            None
        } else {
            core.session_manager
                .load_from_host_info(&self.hostname, 0)
                .filter(|s| s.version() >= policy.min_version() && s.version() <= policy.pref_version())
                .filter(|s| srp_identifier.is_empty() || s.srp_identifier() == srp_identifier)
        };

        let mut suites = policy.ciphersuite_list(!srp_identifier.is_empty());
        let mut extensions = Extensions::new();
        extensions.add(Extension::RenegotiationInfo(
            core.secure_renegotiation.for_client_hello().to_vec(),
        ));
        if !policy.allowed_ecc_curves().is_empty() {
            extensions.add(Extension::SupportedEllipticCurves(
                policy.allowed_ecc_curves().to_vec(),
            ));
        }
        if policy.pref_version().supports_negotiable_signature_algorithms() {
            let schemes = policy
                .allowed_signature_methods()
                .iter()
                .flat_map(|sig| {
                    policy
                        .allowed_signature_hashes()
                        .iter()
                        .map(move |h| SignatureScheme::new(*h, *sig))
                })
                .collect();
            extensions.add(Extension::SignatureAlgorithms(schemes));
        }
        if policy.negotiate_heartbeat_support() {
            extensions.add(Extension::Heartbeat {
                peer_allowed_to_send: true,
            });
        }
        if self.next_protocol_fn.is_some() {
            extensions.add(Extension::NextProtocol(Vec::new()));
        }

        let random = core.rng.random_vec(32)?;
        let mut hello = ClientHello {
            version: policy.pref_version(),
            random: random
                .as_slice()
                .try_into()
                .map_err(|_| TlsError::InternalError("short client random".into()))?,
            session_id: Vec::new(),
            suites: Vec::new(),
            compression_methods: policy.compression().to_vec(),
            extensions: Extensions::new(),
        };

        match resumable {
            Some(session) => {
                log::debug!(
                    "offering to resume session with {} ({})",
                    self.hostname,
                    session.version()
                );
                if !suites.contains(&session.ciphersuite()) {
                    suites.push(session.ciphersuite());
                }
                hello.version = session.version();
                hello.session_id = session.session_id().to_vec();
                hello.compression_methods = vec![session.compression_method()];
                extensions.add(Extension::SessionTicket(session.session_ticket().to_vec()));
                if !session.sni_hostname().is_empty() {
                    extensions.add(Extension::ServerName(session.sni_hostname().to_string()));
                }
                if !session.srp_identifier().is_empty() {
                    extensions.add(Extension::SrpIdentifier(session.srp_identifier().to_string()));
                }
                if session.fragment_size() != 0 {
                    extensions.add(Extension::MaxFragmentLength(session.fragment_size()));
                }
                state.resume_master_secret = Some(session.master_secret().to_vec());
                state.resumed_session = Some(session);
            }
            None => {
                extensions.add(Extension::SessionTicket(Vec::new()));
                if !self.hostname.is_empty() {
                    extensions.add(Extension::ServerName(self.hostname.clone()));
                }
                if !srp_identifier.is_empty() {
                    extensions.add(Extension::SrpIdentifier(srp_identifier));
                }
                if let Some(size) = policy.max_fragment_length() {
                    extensions.add(Extension::MaxFragmentLength(size));
                }
            }
        }
        hello.suites = suites;
        hello.extensions = extensions;

        core.secure_renegotiation.update_client_hello(&hello)?;
        state.send(&mut core.writer, &HandshakeMessage::ClientHello(hello.clone()))?;
        state.client_hello = Some(hello);
        state.set_expected_next(HandshakeType::ServerHello);
        Ok(())
    }

    fn process_hello_request(
        &mut self,
        core: &mut ChannelCore,
        mut state: HandshakeState,
        body: &[u8],
    ) -> Result<Option<HandshakeState>, TlsError> {
        if !body.is_empty() {
            return Err(TlsError::DecodeError("non-empty HelloRequest".into()));
        }
        // Ignored while we are negotiating.
        if state.client_hello.is_some() {
            log::debug!("ignoring HelloRequest during a handshake");
            return Ok(Some(state));
        }
        if !core.secure_renegotiation.supported() && core.policy.require_secure_renegotiation() {
            core.send_alert(Alert::warning(AlertDescription::NoRenegotiation))?;
            return Ok(None);
        }
        self.send_client_hello(core, &mut state, false)?;
        Ok(Some(state))
    }

    fn process_server_hello(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        sh: ServerHello,
    ) -> Result<(), TlsError> {
        let ch = state
            .client_hello
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("ServerHello without ClientHello".into()))?;

        if !ch.offered_suite(sh.suite) {
            return Err(TlsError::HandshakeFailed(format!(
                "server chose ciphersuite {:#06x}, which we did not offer",
                sh.suite.0
            )));
        }
        if !ch.compression_methods.contains(&sh.compression_method) {
            return Err(TlsError::HandshakeFailed(
                "server chose a compression method we did not offer".into(),
            ));
        }
        if sh.next_protocol_notification() && !ch.next_protocol_notification() {
            return Err(TlsError::HandshakeFailed(
                "server sent next protocol but we did not request it".into(),
            ));
        }
        if sh.supports_session_ticket() && !ch.supports_session_ticket() {
            return Err(TlsError::HandshakeFailed(
                "server sent session ticket extension but we did not".into(),
            ));
        }
        if sh.extensions.heartbeat().is_some() && ch.extensions.heartbeat().is_none() {
            return Err(TlsError::HandshakeFailed(
                "server sent heartbeat extension but we did not".into(),
            ));
        }
        if sh.fragment_size() != 0 && sh.fragment_size() != ch.fragment_size() {
            return Err(TlsError::IllegalParameter(
                "server replied with a different fragment size".into(),
            ));
        }

        let suite = CipherSuiteInfo::by_id(sh.suite).ok_or_else(|| {
            TlsError::HandshakeFailed(format!("unknown ciphersuite {:#06x}", sh.suite.0))
        })?;

        let resuming = state.resumed_session.is_some()
            && !sh.session_id.is_empty()
            && sh.session_id == ch.session_id;

        if resuming {
            let session = state
                .resumed_session
                .as_ref()
                .ok_or_else(|| TlsError::InternalError("no session to resume".into()))?;
            if sh.version != session.version() {
                return Err(TlsError::HandshakeFailed(
                    "server resumed session but with a different version".into(),
                ));
            }
            if sh.suite != session.ciphersuite() {
                return Err(TlsError::HandshakeFailed(
                    "server resumed session but with a different ciphersuite".into(),
                ));
            }
            if sh.compression_method != session.compression_method() {
                return Err(TlsError::HandshakeFailed(
                    "server resumed session but with a different compression method".into(),
                ));
            }
        } else {
            if !sh.version.is_known() {
                return Err(TlsError::ProtocolVersion(format!(
                    "server replied with unknown version {}",
                    sh.version
                )));
            }
            if sh.version > ch.version {
                return Err(TlsError::HandshakeFailed(format!(
                    "server replied with {}, later than the {} we offered",
                    sh.version, ch.version
                )));
            }
            if sh.version < core.policy.min_version() {
                return Err(TlsError::ProtocolVersion(format!(
                    "server version {} is unacceptable by policy",
                    sh.version
                )));
            }
            if !suite.usable_in(sh.version) {
                return Err(TlsError::HandshakeFailed(format!(
                    "server chose {}, which is not usable in {}",
                    suite.name, sh.version
                )));
            }
        }

        core.secure_renegotiation.update_server_hello(&sh)?;

        log::debug!(
            "server chose {} with {}{}",
            suite.name,
            sh.version,
            if resuming { ", resuming" } else { "" }
        );
        state.set_suite(suite);
        state.set_version(sh.version);
        core.writer.set_version(sh.version);
        core.reader.set_version(sh.version);
        if sh.fragment_size() != 0 {
            core.writer.set_maximum_fragment_size(sh.fragment_size());
            core.reader.set_maximum_fragment_size(sh.fragment_size());
        }
        core.heartbeat_negotiated = sh.extensions.heartbeat().is_some();
        core.heartbeat_sending_allowed = sh.extensions.heartbeat() == Some(true);

        let ticket_expected = sh.supports_session_ticket();
        state.server_hello = Some(sh);

        if resuming {
            state.compute_resumed_keys()?;
            if ticket_expected {
                state.set_expected_next(HandshakeType::NewSessionTicket);
            } else {
                state.set_expected_next(HandshakeType::HandshakeCcs);
            }
        } else {
            state.resume_master_secret = None;
            state.resumed_session = None;
            if suite.sig.is_some() {
                state.set_expected_next(HandshakeType::Certificate);
            } else if suite.kex == KexAlgo::Psk {
                // The server sends a key exchange only if it has a hint.
                state.set_expected_next(HandshakeType::ServerKeyExchange);
                state.set_expected_next(HandshakeType::ServerHelloDone);
            } else {
                state.set_expected_next(HandshakeType::ServerKeyExchange);
            }
        }
        Ok(())
    }

    fn process_server_certificate(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
        chain: Vec<Certificate>,
    ) -> Result<(), TlsError> {
        let suite = state.suite()?;
        if suite.kex == KexAlgo::Rsa {
            state.set_expected_next(HandshakeType::CertificateRequest);
            state.set_expected_next(HandshakeType::ServerHelloDone);
        } else {
            state.set_expected_next(HandshakeType::ServerKeyExchange);
        }

        let leaf = chain.first().ok_or_else(|| {
            TlsError::HandshakeFailed("server sent an empty certificate chain".into())
        })?;
        let key = core
            .credentials
            .subject_public_key(leaf)
            .map_err(as_bad_certificate)?;
        if Some(key.algo()) != suite.sig {
            return Err(TlsError::HandshakeFailed(format!(
                "certificate key type {} does not match ciphersuite {}",
                key.algo().name(),
                suite.name
            )));
        }
        core.credentials
            .verify_certificate_chain(TlsRole::Client, &self.hostname, &chain)
            .map_err(as_bad_certificate)?;

        state.peer_public_key = Some(key);
        state.server_certs = Some(chain);
        Ok(())
    }

    fn process_server_key_exchange(
        &mut self,
        state: &mut HandshakeState,
        ske: ServerKeyExchange,
    ) -> Result<(), TlsError> {
        let suite = state.suite()?;
        if suite.sig.is_some() {
            state.set_expected_next(HandshakeType::CertificateRequest);
        }
        state.set_expected_next(HandshakeType::ServerHelloDone);

        if suite.sig.is_some() {
            let key = state.peer_public_key.as_ref().ok_or_else(|| {
                TlsError::InternalError("signed key exchange without a server key".into())
            })?;
            if let Some(scheme) = ske.scheme {
                let offered = state
                    .client_hello
                    .as_ref()
                    .map(|ch| ch.signature_schemes().contains(&scheme))
                    .unwrap_or(false);
                if !offered {
                    return Err(TlsError::IllegalParameter(format!(
                        "server signed with scheme {:#06x}, which we did not offer",
                        scheme.0
                    )));
                }
            }
            let mut signed = Vec::with_capacity(64 + 256);
            signed.extend_from_slice(state.client_random()?);
            signed.extend_from_slice(state.server_random()?);
            signed.extend_from_slice(&ske.params.encode());
            if !verify_message(key, state.version(), ske.scheme, &signed, &ske.signature)? {
                return Err(TlsError::DecryptError(
                    "bad signature on server key exchange".into(),
                ));
            }
        }
        state.server_kex = Some(ske);
        Ok(())
    }

    /// Our half of the key exchange and the resulting pre-master secret.
    fn client_key_exchange(
        &self,
        core: &ChannelCore,
        state: &HandshakeState,
    ) -> Result<(ClientKeyExchange, Vec<u8>), TlsError> {
        let suite = state.suite()?;
        let rng = core.rng.as_ref();
        let creds = core.credentials.as_ref();

        let server_params = move || {
            state.server_kex.as_ref().map(|ske| &ske.params).ok_or_else(|| {
                TlsError::UnexpectedMessage("missing ServerKeyExchange".into())
            })
        };
        let psk_for_hint = move |hint: &str| -> Result<(String, Vec<u8>), TlsError> {
            let identity = creds.psk_identity(TlsRole::Client, "tls-client", hint);
            let psk = creds.psk(TlsRole::Client, "tls-client", &identity)?;
            Ok((identity, psk))
        };

        match suite.kex {
            KexAlgo::Rsa => {
                let key = match state.peer_public_key.as_ref() {
                    Some(PublicKey::Rsa(k)) => k,
                    _ => {
                        return Err(TlsError::HandshakeFailed(
                            "RSA key exchange needs an RSA server certificate".into(),
                        ))
                    }
                };
                let offered = state
                    .client_hello
                    .as_ref()
                    .map_or(state.version(), |ch| ch.version);
                let (pms, ct) = rsa_encrypt_premaster(key, offered, rng)?;
                Ok((ClientKeyExchange::Rsa(ct), pms))
            }
            KexAlgo::Dh => match server_params()? {
                ServerKexParams::Dh { p, g, public } => {
                    let (ours, pms) = dh_agree(p, g, public, rng)?;
                    Ok((ClientKeyExchange::Dh(ours), pms))
                }
                _ => Err(mismatched_params()),
            },
            KexAlgo::Ecdh => match server_params()? {
                ServerKexParams::Ecdh { curve, public } => {
                    check_curve(core, *curve)?;
                    let kx = EcdhKeyExchange::generate(*curve, rng)?;
                    let pms = kx.compute_shared_secret(public)?;
                    Ok((ClientKeyExchange::Ecdh(kx.public_key_bytes().to_vec()), pms))
                }
                _ => Err(mismatched_params()),
            },
            KexAlgo::Psk => {
                let hint = match state.server_kex.as_ref().map(|ske| &ske.params) {
                    Some(ServerKexParams::Psk { identity_hint }) => identity_hint.as_str(),
                    Some(_) => return Err(mismatched_params()),
                    None => "",
                };
                let (identity, mut psk) = psk_for_hint(hint)?;
                let pms = psk_premaster_secret(None, &psk);
                psk.zeroize();
                Ok((ClientKeyExchange::Psk { identity }, pms))
            }
            KexAlgo::DhePsk => match server_params()? {
                ServerKexParams::DhePsk {
                    identity_hint,
                    p,
                    g,
                    public,
                } => {
                    let (identity, mut psk) = psk_for_hint(identity_hint)?;
                    let (ours, mut dh_secret) = dh_agree(p, g, public, rng)?;
                    let pms = psk_premaster_secret(Some(&dh_secret), &psk);
                    psk.zeroize();
                    dh_secret.zeroize();
                    Ok((
                        ClientKeyExchange::DhePsk {
                            identity,
                            public: ours,
                        },
                        pms,
                    ))
                }
                _ => Err(mismatched_params()),
            },
            KexAlgo::EcdhePsk => match server_params()? {
                ServerKexParams::EcdhePsk {
                    identity_hint,
                    curve,
                    public,
                } => {
                    check_curve(core, *curve)?;
                    let (identity, mut psk) = psk_for_hint(identity_hint)?;
                    let kx = EcdhKeyExchange::generate(*curve, rng)?;
                    let mut ecdh_secret = kx.compute_shared_secret(public)?;
                    let pms = psk_premaster_secret(Some(&ecdh_secret), &psk);
                    psk.zeroize();
                    ecdh_secret.zeroize();
                    Ok((
                        ClientKeyExchange::EcdhePsk {
                            identity,
                            public: kx.public_key_bytes().to_vec(),
                        },
                        pms,
                    ))
                }
                _ => Err(mismatched_params()),
            },
            KexAlgo::SrpSha => match server_params()? {
                ServerKexParams::Srp {
                    n,
                    g,
                    salt,
                    public_b,
                } => {
                    let group = DhGroup::from_params(n, g)?;
                    let identifier = creds.srp_identifier(TlsRole::Client, &self.hostname);
                    let mut password =
                        creds.srp_password(TlsRole::Client, &self.hostname, &identifier);
                    let result =
                        srp6_client_agree(&identifier, &password, &group, salt, public_b, rng);
                    password.zeroize();
                    let (a, pms) = result?;
                    Ok((ClientKeyExchange::Srp(a), pms))
                }
                _ => Err(mismatched_params()),
            },
        }
    }

    fn process_server_hello_done(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
    ) -> Result<(), TlsError> {
        let suite = state.suite()?;

        if let Some(cert_req) = state.cert_req.as_ref() {
            let types: Vec<SigAlgo> = cert_req
                .cert_types
                .iter()
                .filter_map(|t| SigAlgo::from_client_cert_type(*t))
                .collect();
            let chain = core
                .credentials
                .cert_chain(&types, TlsRole::Client, &self.hostname);
            state.send(&mut core.writer, &HandshakeMessage::Certificate(chain.clone()))?;
            state.client_certs = Some(chain);
        }

        let (cke, mut pms) = self.client_key_exchange(core, state)?;
        state.send(&mut core.writer, &HandshakeMessage::ClientKeyExchange(cke))?;
        let derived = state.compute_session_keys(&pms, false);
        pms.zeroize();
        derived?;

        let leaf = state
            .client_certs
            .as_ref()
            .and_then(|chain| chain.first())
            .cloned();
        if let Some(leaf) = leaf {
            let key = core
                .credentials
                .private_key_for(&leaf, TlsRole::Client, &self.hostname)
                .ok_or_else(|| {
                    TlsError::InternalError("no private key for our client certificate".into())
                })?;
            let scheme = if state.version().supports_negotiable_signature_algorithms() {
                let offered = state
                    .cert_req
                    .as_ref()
                    .map(|cr| cr.schemes.clone())
                    .unwrap_or_default();
                Some(
                    choose_scheme(key.algo(), core.policy.allowed_signature_hashes(), &offered)
                        .ok_or_else(|| {
                            TlsError::HandshakeFailed(
                                "no signature scheme shared with the server".into(),
                            )
                        })?,
                )
            } else {
                None
            };
            let cv = state.sign_certificate_verify(&key, scheme, core.rng.as_ref())?;
            state.send(&mut core.writer, &HandshakeMessage::CertificateVerify(cv))?;
        }

        state.send_change_cipher_spec(&mut core.writer)?;
        core.writer
            .activate(TlsRole::Client, suite, state.keys()?, state.compression_method())?;
        self.send_next_protocol(core, state)?;
        state.send_finished(&mut core.writer)?;

        let ticket_expected = state
            .server_hello
            .as_ref()
            .map_or(false, |sh| sh.supports_session_ticket());
        if ticket_expected {
            state.set_expected_next(HandshakeType::NewSessionTicket);
        } else {
            state.set_expected_next(HandshakeType::HandshakeCcs);
        }
        Ok(())
    }

    /// Pick and send a protocol if the server advertised NPN.
    fn send_next_protocol(
        &mut self,
        core: &mut ChannelCore,
        state: &mut HandshakeState,
    ) -> Result<(), TlsError> {
        let advertised = match state.server_hello.as_ref() {
            Some(sh) if sh.next_protocol_notification() => sh.next_protocols().to_vec(),
            _ => return Ok(()),
        };
        if let Some(choose) = self.next_protocol_fn.as_mut() {
            let protocol = choose(&advertised);
            log::debug!("next protocol: {protocol:?}");
            state.send(&mut core.writer, &HandshakeMessage::NextProtocol(protocol.clone()))?;
            state.next_protocol = Some(protocol);
        }
        Ok(())
    }

    fn process_finished(
        &mut self,
        core: &mut ChannelCore,
        mut state: HandshakeState,
        verify_data: &[u8],
    ) -> Result<Option<HandshakeState>, TlsError> {
        let expected = state.verify_data(TlsRole::Server)?;
        if !bool::from(verify_data.ct_eq(&expected)) {
            return Err(TlsError::DecryptError("server Finished did not verify".into()));
        }
        state.server_finished = Some(verify_data.to_vec());
        state.hash(HandshakeType::Finished, verify_data);

        // Abbreviated handshake: our flight follows the server's.
        if state.client_finished.is_none() {
            let suite = state.suite()?;
            state.send_change_cipher_spec(&mut core.writer)?;
            core.writer
                .activate(TlsRole::Client, suite, state.keys()?, state.compression_method())?;
            self.send_next_protocol(core, &mut state)?;
            state.send_finished(&mut core.writer)?;
        }

        let session = self.build_session(core, &state)?;

        if let (Some(c), Some(s)) = (state.client_finished.as_ref(), state.server_finished.as_ref()) {
            core.secure_renegotiation.update_finished(c, s);
        }
        core.peer_certs = match state.server_certs.take() {
            Some(chain) => chain,
            None => session.peer_certs().to_vec(),
        };
        core.next_protocol = state.next_protocol.take().unwrap_or_default();

        if (core.handshake_fn)(&session) && !session.session_id().is_empty() {
            core.session_manager.save(&session);
        } else {
            core.session_manager.remove_entry(session.session_id());
        }
        core.handshake_complete(state.version());
        Ok(None)
    }

    fn build_session(
        &self,
        core: &ChannelCore,
        state: &HandshakeState,
    ) -> Result<Session, TlsError> {
        let ch = state
            .client_hello
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("no ClientHello".into()))?;
        let sh = state
            .server_hello
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("no ServerHello".into()))?;

        let ticket = match state.new_session_ticket.as_ref() {
            Some(nst) if !nst.ticket.is_empty() => nst.ticket.clone(),
            _ => ch.session_ticket().to_vec(),
        };
        let mut session_id = sh.session_id.clone();
        if session_id.is_empty() && !ticket.is_empty() {
            session_id = core.rng.random_vec(32)?;
        }
        let peer_certs = match (state.server_certs.as_ref(), state.resumed_session.as_ref()) {
            (Some(chain), _) => chain.clone(),
            (None, Some(resumed)) => resumed.peer_certs().to_vec(),
            (None, None) => Vec::new(),
        };

        Ok(Session::new(
            session_id,
            state.keys()?.master_secret().to_vec(),
            sh.version,
            sh.suite,
            sh.compression_method,
            TlsRole::Client,
            core.secure_renegotiation.supported(),
            ch.fragment_size(),
            peer_certs,
            ticket,
            ch.sni_hostname().to_string(),
            ch.srp_identifier().to_string(),
        ))
    }
}

impl Endpoint for ClientEndpoint {
    const ROLE: TlsRole = TlsRole::Client;

    /// A server-initiated exchange can only begin with HelloRequest, which
    /// bypasses the expected set.
    fn new_handshake_state(&self, core: &ChannelCore) -> HandshakeState {
        let mut state = HandshakeState::new(TlsRole::Client);
        state.set_version(core.writer.version());
        state
    }

    fn process_handshake_msg(
        &mut self,
        core: &mut ChannelCore,
        mut state: HandshakeState,
        ty: HandshakeType,
        body: &[u8],
    ) -> Result<Option<HandshakeState>, TlsError> {
        if ty == HandshakeType::HelloRequest {
            return self.process_hello_request(core, state, body);
        }

        state.confirm_transition_to(ty)?;
        let msg = HandshakeMessage::decode(ty, body, state.version(), state.suite_opt())?;
        if !matches!(ty, HandshakeType::HandshakeCcs | HandshakeType::Finished) {
            state.hash(ty, body);
        }

        match msg {
            HandshakeMessage::ServerHello(sh) => self.process_server_hello(core, &mut state, sh)?,
            HandshakeMessage::Certificate(chain) => {
                self.process_server_certificate(core, &mut state, chain)?
            }
            HandshakeMessage::ServerKeyExchange(ske) => {
                self.process_server_key_exchange(&mut state, ske)?
            }
            HandshakeMessage::CertificateRequest(cr) => {
                state.set_expected_next(HandshakeType::ServerHelloDone);
                state.cert_req = Some(cr);
            }
            HandshakeMessage::ServerHelloDone => {
                self.process_server_hello_done(core, &mut state)?
            }
            HandshakeMessage::NewSessionTicket(nst) => {
                state.new_session_ticket = Some(nst);
                state.set_expected_next(HandshakeType::HandshakeCcs);
            }
            HandshakeMessage::ChangeCipherSpec => {
                let suite = state.suite()?;
                core.reader
                    .activate(TlsRole::Client, suite, state.keys()?, state.compression_method())?;
                state.set_expected_next(HandshakeType::Finished);
            }
            HandshakeMessage::Finished(verify_data) => {
                return self.process_finished(core, state, &verify_data);
            }
            other => {
                return Err(TlsError::UnexpectedMessage(format!(
                    "client cannot process {:?}",
                    other.msg_type()
                )))
            }
        }
        Ok(Some(state))
    }

    fn renegotiate(&mut self, core: &mut ChannelCore, force_full: bool) -> Result<(), TlsError> {
        let mut state = self.new_handshake_state(core);
        self.send_client_hello(core, &mut state, force_full)?;
        core.state = Some(state);
        Ok(())
    }
}

impl std::fmt::Debug for ClientEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEndpoint")
            .field("hostname", &self.hostname)
            .field("npn", &self.next_protocol_fn.is_some())
            .finish()
    }
}

fn dh_agree(
    p: &[u8],
    g: &[u8],
    server_public: &[u8],
    rng: &dyn RandomSource,
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let group = DhGroup::from_params(p, g)?;
    let kx = DhKeyExchange::generate(group, rng)?;
    let secret = kx.compute_shared_secret(server_public)?;
    Ok((kx.public_key_bytes().to_vec(), secret))
}

fn check_curve(core: &ChannelCore, curve: EccCurveId) -> Result<(), TlsError> {
    if core.policy.allowed_ecc_curves().contains(&curve) {
        Ok(())
    } else {
        Err(TlsError::HandshakeFailed(format!(
            "server sent ECC curve {curve:?} prohibited by policy"
        )))
    }
}

fn mismatched_params() -> TlsError {
    TlsError::InternalError("key exchange parameters do not match the ciphersuite".into())
}

/// Certificate problems reported by the credentials manager surface as
/// bad_certificate.
pub(crate) fn as_bad_certificate(err: TlsError) -> TlsError {
    match err {
        TlsError::BadCertificate(_) => err,
        other => TlsError::BadCertificate(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_errors_become_bad_certificate() {
        let e = as_bad_certificate(TlsError::InternalError("expired".into()));
        assert!(matches!(e, TlsError::BadCertificate(ref m) if m.contains("expired")));
        let e = as_bad_certificate(TlsError::BadCertificate("untrusted".into()));
        assert!(matches!(e, TlsError::BadCertificate(ref m) if m == "untrusted"));
    }

    #[test]
    fn test_mismatched_params_is_internal() {
        assert!(matches!(mismatched_params(), TlsError::InternalError(_)));
    }

    #[test]
    fn test_endpoint_debug_hides_callback() {
        let ep = ClientEndpoint::new("example.com", None);
        let s = format!("{ep:?}");
        assert!(s.contains("example.com"));
        assert!(s.contains("npn: false"));
    }
}
