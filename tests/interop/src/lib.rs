//! End-to-end scenarios for bastion-tls.
//! A client and a server channel talk over in-memory pipes; every test
//! drives complete handshakes through the public API only.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, OnceLock};

    use bastion_tls::alert::{Alert, AlertDescription};
    use bastion_tls::channel::{
        Callbacks, ChannelContext, ChannelEvent, Client, NextProtocolFn, Server,
    };
    use bastion_tls::config::Policy;
    use bastion_tls::credentials::{Certificate, CredentialsManager, SrpVerifier};
    use bastion_tls::crypt::ciphersuite::{KexAlgo, SigAlgo};
    use bastion_tls::crypt::kex::{srp6_generate_verifier, DhGroup};
    use bastion_tls::crypt::signature::{PrivateKey, PublicKey};
    use bastion_tls::session::{InMemorySessionManager, NoopSessionManager, Session, SessionManager};
    use bastion_tls::{CipherSuite, ProtocolVersion, TlsRole};
    use bastion_types::{CipherAlgId, HashAlgId, TlsError};

    // -------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------

    fn rsa_key() -> PrivateKey {
        static KEY: OnceLock<rsa::RsaPrivateKey> = OnceLock::new();
        let key = KEY.get_or_init(|| rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap());
        PrivateKey::Rsa(key.clone())
    }

    fn ecdsa_key() -> PrivateKey {
        static KEY: OnceLock<p256::ecdsa::SigningKey> = OnceLock::new();
        let key = KEY.get_or_init(|| p256::ecdsa::SigningKey::random(&mut rand::thread_rng()));
        PrivateKey::Ecdsa(key.clone())
    }

    /// Test certificates carry only the subject public key.
    fn cert_for(key: &PrivateKey) -> Certificate {
        Certificate(key.public_key().to_spki_der().unwrap())
    }

    #[derive(Default)]
    struct Credentials {
        keys: Vec<PrivateKey>,
        reject_chains: bool,
        psk: Option<Vec<u8>>,
        psk_hint: String,
        ticket_key: Option<Vec<u8>>,
        srp_login: Option<(String, String)>,
        srp_verifier: Option<SrpVerifier>,
    }

    impl CredentialsManager for Credentials {
        fn cert_chain(&self, key_types: &[SigAlgo], _role: TlsRole, _hostname: &str) -> Vec<Certificate> {
            self.keys
                .iter()
                .find(|k| key_types.contains(&k.algo()))
                .map(|k| vec![cert_for(k)])
                .unwrap_or_default()
        }

        fn private_key_for(&self, cert: &Certificate, _role: TlsRole, _hostname: &str) -> Option<PrivateKey> {
            self.keys.iter().find(|k| cert_for(k) == *cert).cloned()
        }

        fn verify_certificate_chain(
            &self,
            _role: TlsRole,
            _hostname: &str,
            _chain: &[Certificate],
        ) -> Result<(), TlsError> {
            if self.reject_chains {
                Err(TlsError::BadCertificate("untrusted issuer".into()))
            } else {
                Ok(())
            }
        }

        fn subject_public_key(&self, cert: &Certificate) -> Result<PublicKey, TlsError> {
            PublicKey::from_spki_der(cert.der())
        }

        fn psk(&self, _role: TlsRole, context: &str, identity: &str) -> Result<Vec<u8>, TlsError> {
            let key = match context {
                "session-ticket" => self.ticket_key.clone(),
                _ if identity == "client-1" => self.psk.clone(),
                _ => None,
            };
            key.ok_or_else(|| TlsError::UnknownPskIdentity(identity.into()))
        }

        fn psk_identity_hint(&self, _role: TlsRole, _context: &str) -> String {
            self.psk_hint.clone()
        }

        fn psk_identity(&self, _role: TlsRole, _context: &str, _hint: &str) -> String {
            "client-1".into()
        }

        fn attempt_srp(&self, role: TlsRole, _hostname: &str) -> bool {
            match role {
                TlsRole::Client => self.srp_login.is_some(),
                TlsRole::Server => self.srp_verifier.is_some(),
            }
        }

        fn srp_identifier(&self, _role: TlsRole, _hostname: &str) -> String {
            self.srp_login.as_ref().map(|(id, _)| id.clone()).unwrap_or_default()
        }

        fn srp_password(&self, _role: TlsRole, _hostname: &str, _identifier: &str) -> String {
            self.srp_login.as_ref().map(|(_, pw)| pw.clone()).unwrap_or_default()
        }

        fn srp_verifier(&self, _role: TlsRole, _hostname: &str, identifier: &str) -> Option<SrpVerifier> {
            (identifier == "carol").then(|| self.srp_verifier.clone()).flatten()
        }
    }

    #[derive(Clone, Default)]
    struct Endpoint {
        wire: Arc<Mutex<Vec<u8>>>,
        received: Arc<Mutex<Vec<u8>>>,
        alerts: Arc<Mutex<Vec<Alert>>>,
        sessions: Arc<Mutex<Vec<Session>>>,
    }

    impl Endpoint {
        fn callbacks(&self, keep_sessions: bool) -> Callbacks {
            let wire = self.wire.clone();
            let received = self.received.clone();
            let alerts = self.alerts.clone();
            let sessions = self.sessions.clone();
            Callbacks::new(
                Box::new(move |b: &[u8]| wire.lock().unwrap().extend_from_slice(b)),
                Box::new(move |event: ChannelEvent<'_>| match event {
                    ChannelEvent::ApplicationData(d) => received.lock().unwrap().extend_from_slice(d),
                    ChannelEvent::Alert(a) => alerts.lock().unwrap().push(a),
                    ChannelEvent::HeartbeatPayload(_) => {}
                }),
                Box::new(move |s: &Session| {
                    sessions.lock().unwrap().push(s.clone());
                    keep_sessions
                }),
            )
        }

        fn take_wire(&self) -> Vec<u8> {
            std::mem::take(&mut *self.wire.lock().unwrap())
        }

        fn received(&self) -> Vec<u8> {
            self.received.lock().unwrap().clone()
        }

        fn last_session(&self) -> Session {
            self.sessions.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct Setup {
        client_policy: Policy,
        server_policy: Policy,
        client_creds: Credentials,
        server_creds: Credentials,
        client_sessions: Arc<dyn SessionManager>,
        server_sessions: Arc<dyn SessionManager>,
        keep_sessions: bool,
        next_protocols: Vec<String>,
        next_protocol_fn: Option<NextProtocolFn>,
    }

    impl Setup {
        fn new(policy: Policy) -> Self {
            Self {
                client_policy: policy.clone(),
                server_policy: policy,
                client_creds: Credentials::default(),
                server_creds: Credentials {
                    keys: vec![rsa_key()],
                    ..Default::default()
                },
                client_sessions: Arc::new(NoopSessionManager),
                server_sessions: Arc::new(NoopSessionManager),
                keep_sessions: true,
                next_protocols: Vec::new(),
                next_protocol_fn: None,
            }
        }

        fn connect(self) -> Conn {
            let c = Endpoint::default();
            let s = Endpoint::default();
            let server = Server::new(
                ChannelContext::new(
                    Arc::new(self.server_policy),
                    Arc::new(self.server_creds),
                    self.server_sessions,
                ),
                s.callbacks(self.keep_sessions),
                self.next_protocols,
            );
            let client = Client::new(
                ChannelContext::new(
                    Arc::new(self.client_policy),
                    Arc::new(self.client_creds),
                    self.client_sessions,
                ),
                c.callbacks(self.keep_sessions),
                "www.example.com",
                self.next_protocol_fn,
            )
            .unwrap();
            Conn {
                client,
                server,
                c,
                s,
            }
        }
    }

    struct Conn {
        client: Client,
        server: Server,
        c: Endpoint,
        s: Endpoint,
    }

    impl Conn {
        fn run(&mut self) -> Result<(), TlsError> {
            for _ in 0..32 {
                let to_server = self.c.take_wire();
                let to_client = self.s.take_wire();
                if to_server.is_empty() && to_client.is_empty() {
                    return Ok(());
                }
                if !to_server.is_empty() && !self.server.is_closed() {
                    self.server.received_data(&to_server)?;
                }
                if !to_client.is_empty() && !self.client.is_closed() {
                    self.client.received_data(&to_client)?;
                }
            }
            panic!("peers kept talking");
        }

        fn established(mut self) -> Self {
            self.run().unwrap();
            assert!(self.client.is_active(), "client not active");
            assert!(self.server.is_active(), "server not active");
            self
        }

        /// Round trip some data in both directions.
        fn exchange(&mut self) {
            self.client.send(b"client says hi").unwrap();
            self.server.send(b"server says hi").unwrap();
            self.run().unwrap();
            assert!(self.s.received().ends_with(b"client says hi"));
            assert!(self.c.received().ends_with(b"server says hi"));
        }
    }

    fn policy(kex: &[KexAlgo]) -> Policy {
        Policy::builder().key_exchange_methods(kex).build().unwrap()
    }

    /// Split a byte stream into (content type, record length) pairs.
    fn records(wire: &[u8]) -> Vec<(u8, usize)> {
        let mut out = Vec::new();
        let mut rest = wire;
        while rest.len() >= 5 {
            let len = u16::from_be_bytes([rest[3], rest[4]]) as usize;
            out.push((rest[0], len));
            rest = &rest[5 + len..];
        }
        assert!(rest.is_empty());
        out
    }

    // -------------------------------------------------------
    // 1. Record framing of a TLS 1.2 CBC connection
    // -------------------------------------------------------
    #[test]
    fn test_aes128_sha_record_size() {
        let p = Policy::builder()
            .key_exchange_methods(&[KexAlgo::Rsa])
            .ciphers(&[CipherAlgId::Aes128])
            .macs(&[HashAlgId::Sha1])
            .build()
            .unwrap();
        let mut conn = Setup::new(p).connect().established();
        assert_eq!(
            conn.c.last_session().ciphersuite(),
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA
        );

        conn.client.send(b"hello").unwrap();
        let wire = conn.c.take_wire();
        // header, explicit IV, then "hello" + 20 byte MAC padded to 32
        assert_eq!(wire.len(), 5 + 16 + 32);
        assert_eq!(&wire[..5], &[23, 3, 3, 0, 48]);

        conn.server.received_data(&wire).unwrap();
        assert_eq!(conn.s.received(), b"hello");
    }

    // -------------------------------------------------------
    // 2. Every protocol version
    // -------------------------------------------------------
    #[test]
    fn test_each_protocol_version() {
        for version in [
            ProtocolVersion::SSL_V3,
            ProtocolVersion::TLS_V10,
            ProtocolVersion::TLS_V11,
            ProtocolVersion::TLS_V12,
        ] {
            let client_policy = Policy::builder()
                .key_exchange_methods(&[KexAlgo::Rsa])
                .pref_version(version)
                .build()
                .unwrap();
            let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
            setup.client_policy = client_policy;
            let mut conn = setup.connect().established();
            assert_eq!(conn.client.version(), Some(version));
            conn.exchange();
        }
    }

    #[test]
    fn test_tls10_splits_application_data() {
        let p = Policy::builder()
            .key_exchange_methods(&[KexAlgo::Rsa])
            .pref_version(ProtocolVersion::TLS_V10)
            .ciphers(&[CipherAlgId::Aes128])
            .build()
            .unwrap();
        let mut conn = Setup::new(p).connect().established();
        conn.client.send(b"split me").unwrap();
        let wire = conn.c.take_wire();
        assert_eq!(records(&wire).len(), 2);
        conn.server.received_data(&wire).unwrap();
        assert_eq!(conn.s.received(), b"split me");
    }

    #[test]
    fn test_stream_and_block_ciphers() {
        for cipher in [CipherAlgId::Rc4_128, CipherAlgId::TripleDes, CipherAlgId::Aes256] {
            let p = Policy::builder()
                .key_exchange_methods(&[KexAlgo::Rsa])
                .ciphers(&[cipher])
                .build()
                .unwrap();
            let mut conn = Setup::new(p).connect().established();
            conn.exchange();
        }
    }

    // -------------------------------------------------------
    // 3. Key exchanges
    // -------------------------------------------------------
    #[test]
    fn test_ecdhe_ecdsa() {
        let mut setup = Setup::new(policy(&[KexAlgo::Ecdh]));
        setup.server_creds.keys = vec![ecdsa_key()];
        let mut conn = setup.connect().established();
        assert_eq!(
            conn.client.peer_cert_chain(),
            &[cert_for(&ecdsa_key())]
        );
        assert_eq!(
            conn.c.last_session().ciphersuite(),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384
        );
        conn.exchange();
    }

    #[test]
    fn test_server_picks_chain_by_suite() {
        // Both keys available; the policy ranks RSA signatures first.
        let p = Policy::builder()
            .key_exchange_methods(&[KexAlgo::Ecdh])
            .signature_methods(&[SigAlgo::Rsa, SigAlgo::Ecdsa])
            .build()
            .unwrap();
        let mut setup = Setup::new(p);
        setup.server_creds.keys = vec![ecdsa_key(), rsa_key()];
        let conn = setup.connect().established();
        assert_eq!(conn.client.peer_cert_chain(), &[cert_for(&rsa_key())]);
    }

    #[test]
    fn test_ecdhe_psk_with_hint() {
        let mut setup = Setup::new(policy(&[KexAlgo::EcdhePsk]));
        setup.client_creds.psk = Some(b"shared secret".to_vec());
        setup.server_creds = Credentials {
            psk: Some(b"shared secret".to_vec()),
            psk_hint: "bastion".into(),
            ..Default::default()
        };
        let mut conn = setup.connect().established();
        conn.exchange();
    }

    #[test]
    fn test_dhe_psk() {
        let mut setup = Setup::new(policy(&[KexAlgo::DhePsk]));
        setup.client_creds.psk = Some(vec![1; 32]);
        setup.server_creds = Credentials {
            psk: Some(vec![1; 32]),
            ..Default::default()
        };
        let mut conn = setup.connect().established();
        conn.exchange();
    }

    #[test]
    fn test_srp() {
        let group = DhGroup::modp_2048();
        let salt = b"pepper".to_vec();
        let verifier = srp6_generate_verifier("carol", "hunter2", &salt, &group);

        let mut setup = Setup::new(policy(&[KexAlgo::SrpSha]));
        setup.client_creds.srp_login = Some(("carol".into(), "hunter2".into()));
        setup.server_creds = Credentials {
            srp_verifier: Some(SrpVerifier {
                group,
                verifier,
                salt,
            }),
            ..Default::default()
        };
        let mut conn = setup.connect().established();
        assert_eq!(conn.s.last_session().srp_identifier(), "carol");
        conn.exchange();
    }

    #[test]
    fn test_srp_wrong_password() {
        let group = DhGroup::modp_2048();
        let salt = b"pepper".to_vec();
        let verifier = srp6_generate_verifier("carol", "hunter2", &salt, &group);

        let mut setup = Setup::new(policy(&[KexAlgo::SrpSha]));
        setup.client_creds.srp_login = Some(("carol".into(), "hunter3".into()));
        setup.server_creds = Credentials {
            srp_verifier: Some(SrpVerifier {
                group,
                verifier,
                salt,
            }),
            ..Default::default()
        };
        let mut conn = setup.connect();
        assert!(conn.run().is_err());
        assert!(conn.server.is_closed());
    }

    // -------------------------------------------------------
    // 4. Failures surface as alerts on the peer
    // -------------------------------------------------------
    #[test]
    fn test_untrusted_server_certificate() {
        let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
        setup.client_creds.reject_chains = true;
        let mut conn = setup.connect();
        let err = conn.run().unwrap_err();
        assert!(matches!(err, TlsError::BadCertificate(_)));
        assert!(conn.client.is_closed());

        let err = conn.server.received_data(&conn.c.take_wire()).unwrap_err();
        assert!(matches!(err, TlsError::AlertReceived(_)));
        assert_eq!(
            conn.s.alerts.lock().unwrap().as_slice(),
            &[Alert::fatal(AlertDescription::BadCertificate)]
        );
    }

    #[test]
    fn test_no_common_curve() {
        let mut setup = Setup::new(policy(&[KexAlgo::Ecdh]));
        setup.server_policy = Policy::builder()
            .key_exchange_methods(&[KexAlgo::Ecdh])
            .ecc_curves(&[bastion_types::EccCurveId::Secp256r1])
            .build()
            .unwrap();
        setup.client_policy = Policy::builder()
            .key_exchange_methods(&[KexAlgo::Ecdh])
            .ecc_curves(&[bastion_types::EccCurveId::X25519])
            .build()
            .unwrap();
        let mut conn = setup.connect();
        assert!(matches!(conn.run(), Err(TlsError::HandshakeFailed(_))));
    }

    // -------------------------------------------------------
    // 5. Sessions
    // -------------------------------------------------------
    #[test]
    fn test_declined_session_is_not_cached() {
        let client_cache = Arc::new(InMemorySessionManager::new(4));
        let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
        setup.client_sessions = client_cache.clone();
        setup.keep_sessions = false;
        setup.connect().established();
        assert!(client_cache.is_empty());
    }

    #[test]
    fn test_resumption_keeps_negotiated_parameters() {
        let client_cache: Arc<dyn SessionManager> = Arc::new(InMemorySessionManager::new(4));
        let server_cache: Arc<dyn SessionManager> = Arc::new(InMemorySessionManager::new(4));
        let connect = |version| {
            let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
            setup.client_policy = Policy::builder()
                .key_exchange_methods(&[KexAlgo::Rsa])
                .pref_version(version)
                .build()
                .unwrap();
            setup.client_sessions = client_cache.clone();
            setup.server_sessions = server_cache.clone();
            setup.connect().established()
        };

        let first = connect(ProtocolVersion::TLS_V11);
        let mut second = connect(ProtocolVersion::TLS_V11);
        assert_eq!(
            second.s.last_session().session_id(),
            first.s.last_session().session_id()
        );
        assert_eq!(second.client.version(), Some(ProtocolVersion::TLS_V11));
        second.exchange();

        // A client that now prefers TLS 1.2 still offers the 1.1 session;
        // the server resumes it at its original version.
        let third = connect(ProtocolVersion::TLS_V12);
        assert_eq!(third.client.version(), Some(ProtocolVersion::TLS_V11));
    }

    #[test]
    fn test_ticket_survives_server_restart() {
        let client_cache: Arc<dyn SessionManager> = Arc::new(InMemorySessionManager::new(4));
        let connect = || {
            let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
            setup.server_creds.ticket_key = Some(vec![0x5A; 32]);
            setup.client_sessions = client_cache.clone();
            setup.connect().established()
        };
        let first = connect();
        let second = connect();
        assert!(!first.c.last_session().session_ticket().is_empty());
        assert_eq!(
            second.s.last_session().session_id(),
            first.s.last_session().session_id()
        );
    }

    #[test]
    fn test_ticket_from_other_key_falls_back_to_full_handshake() {
        let client_cache: Arc<dyn SessionManager> = Arc::new(InMemorySessionManager::new(4));
        let connect = |key: u8| {
            let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
            setup.server_creds.ticket_key = Some(vec![key; 32]);
            setup.client_sessions = client_cache.clone();
            setup.connect().established()
        };
        let first = connect(1);
        let second = connect(2);
        assert_ne!(
            second.s.last_session().session_id(),
            first.s.last_session().session_id()
        );
    }

    // -------------------------------------------------------
    // 6. Extensions
    // -------------------------------------------------------
    #[test]
    fn test_max_fragment_length() {
        let p = Policy::builder()
            .key_exchange_methods(&[KexAlgo::Rsa])
            .max_fragment_length(Some(512))
            .build()
            .unwrap();
        let mut conn = Setup::new(p).connect().established();
        let payload = vec![0xAB; 2000];
        conn.client.send(&payload).unwrap();
        let wire = conn.c.take_wire();
        assert_eq!(records(&wire).len(), 4);
        conn.server.received_data(&wire).unwrap();
        assert_eq!(conn.s.received(), payload);
        assert_eq!(conn.c.last_session().fragment_size(), 512);
    }

    #[test]
    fn test_large_write_is_fragmented() {
        let mut conn = Setup::new(policy(&[KexAlgo::Rsa])).connect().established();
        let payload: Vec<u8> = (0..40_000u32).map(|i| i as u8).collect();
        conn.server.send(&payload).unwrap();
        let wire = conn.s.take_wire();
        assert_eq!(records(&wire).len(), 3);

        // Feed it back a few bytes at a time.
        for chunk in wire.chunks(777) {
            conn.client.received_data(chunk).unwrap();
        }
        assert_eq!(conn.c.received(), payload);
    }

    #[test]
    fn test_next_protocol_without_server_support() {
        let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
        setup.next_protocol_fn = Some(Box::new(|_: &[String]| "h2".to_string()));
        let conn = setup.connect().established();
        assert_eq!(conn.client.next_protocol(), "");
        assert_eq!(conn.server.next_protocol(), "");
    }

    #[test]
    fn test_client_auth_with_ecdsa() {
        let mut setup = Setup::new(policy(&[KexAlgo::Rsa]));
        setup.client_creds.keys = vec![ecdsa_key()];
        // Any non-empty CA list makes the server ask.
        struct Asking(Credentials);
        impl CredentialsManager for Asking {
            fn cert_chain(&self, t: &[SigAlgo], r: TlsRole, h: &str) -> Vec<Certificate> {
                self.0.cert_chain(t, r, h)
            }
            fn private_key_for(&self, c: &Certificate, r: TlsRole, h: &str) -> Option<PrivateKey> {
                self.0.private_key_for(c, r, h)
            }
            fn verify_certificate_chain(
                &self,
                _role: TlsRole,
                _hostname: &str,
                _chain: &[Certificate],
            ) -> Result<(), TlsError> {
                Ok(())
            }
            fn subject_public_key(&self, c: &Certificate) -> Result<PublicKey, TlsError> {
                self.0.subject_public_key(c)
            }
            fn trusted_certificate_authorities(&self, _r: TlsRole, _h: &str) -> Vec<Vec<u8>> {
                vec![b"CN=Test Root".to_vec()]
            }
        }

        let c = Endpoint::default();
        let s = Endpoint::default();
        let server = Server::new(
            ChannelContext::new(
                Arc::new(setup.server_policy),
                Arc::new(Asking(setup.server_creds)),
                setup.server_sessions,
            ),
            s.callbacks(true),
            Vec::new(),
        );
        let client = Client::new(
            ChannelContext::new(
                Arc::new(setup.client_policy),
                Arc::new(setup.client_creds),
                setup.client_sessions,
            ),
            c.callbacks(true),
            "www.example.com",
            None,
        )
        .unwrap();
        let conn = Conn {
            client,
            server,
            c,
            s,
        }
        .established();
        assert_eq!(conn.server.peer_cert_chain(), &[cert_for(&ecdsa_key())]);
    }
}
