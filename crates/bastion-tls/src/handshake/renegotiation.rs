//! Secure renegotiation bookkeeping (RFC 5746).
//!
//! Lives for the whole connection. Each handshake's hellos are checked
//! against the Finished verify data of the previous one.

use bastion_types::TlsError;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::messages::{ClientHello, ServerHello};

pub struct SecureRenegotiationState {
    initial_handshake: bool,
    secure_renegotiation: bool,
    client_verify: Vec<u8>,
    server_verify: Vec<u8>,
}

impl Default for SecureRenegotiationState {
    fn default() -> Self {
        Self {
            initial_handshake: true,
            secure_renegotiation: false,
            client_verify: Vec::new(),
            server_verify: Vec::new(),
        }
    }
}

impl SecureRenegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection whose first handshake ran without RFC 5746.
    #[cfg(test)]
    pub(crate) fn legacy_peer() -> Self {
        let mut state = Self::default();
        state.initial_handshake = false;
        state
    }

    /// Check a ClientHello, sent or received.
    pub fn update_client_hello(&mut self, hello: &ClientHello) -> Result<(), TlsError> {
        let supported = hello.secure_renegotiation();
        self.check_support(supported, "client")?;
        if supported {
            self.check_data(hello.renegotiation_info(), &self.client_verify, "client")?;
        }
        Ok(())
    }

    /// Check a ServerHello, sent or received. Ends the initial handshake
    /// as far as this state is concerned.
    pub fn update_server_hello(&mut self, hello: &ServerHello) -> Result<(), TlsError> {
        let supported = hello.secure_renegotiation();
        self.check_support(supported, "server")?;
        if supported {
            let expected = self.for_server_hello();
            self.check_data(hello.renegotiation_info(), &expected, "server")?;
        }
        self.initial_handshake = false;
        Ok(())
    }

    /// Record both Finished verify datas of a completed handshake.
    pub fn update_finished(&mut self, client_verify: &[u8], server_verify: &[u8]) {
        self.client_verify.zeroize();
        self.server_verify.zeroize();
        self.client_verify = client_verify.to_vec();
        self.server_verify = server_verify.to_vec();
    }

    pub fn for_client_hello(&self) -> &[u8] {
        &self.client_verify
    }

    pub fn for_server_hello(&self) -> Vec<u8> {
        let mut out = self.client_verify.clone();
        out.extend_from_slice(&self.server_verify);
        out
    }

    pub fn supported(&self) -> bool {
        self.secure_renegotiation
    }

    pub fn renegotiation(&self) -> bool {
        !self.initial_handshake
    }

    fn check_support(&mut self, supported: bool, who: &str) -> Result<(), TlsError> {
        if self.initial_handshake {
            self.secure_renegotiation = supported;
        } else if supported != self.secure_renegotiation {
            return Err(TlsError::HandshakeFailed(format!(
                "{who} changed its mind about secure renegotiation"
            )));
        }
        Ok(())
    }

    fn check_data(&self, got: &[u8], expected: &[u8], who: &str) -> Result<(), TlsError> {
        let ok = if self.initial_handshake {
            got.is_empty()
        } else {
            bool::from(got.ct_eq(expected))
        };
        if ok {
            Ok(())
        } else {
            Err(TlsError::HandshakeFailed(format!(
                "{who} sent bad renegotiation data"
            )))
        }
    }
}

impl Drop for SecureRenegotiationState {
    fn drop(&mut self) {
        self.client_verify.zeroize();
        self.server_verify.zeroize();
    }
}

impl std::fmt::Debug for SecureRenegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureRenegotiationState")
            .field("initial_handshake", &self.initial_handshake)
            .field("secure_renegotiation", &self.secure_renegotiation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{Extension, Extensions};
    use crate::{CipherSuite, ProtocolVersion};

    fn client_hello(reneg: Option<Vec<u8>>) -> ClientHello {
        let mut extensions = Extensions::new();
        if let Some(data) = reneg {
            extensions.add(Extension::RenegotiationInfo(data));
        }
        ClientHello {
            version: ProtocolVersion::TLS_V12,
            random: [0; 32],
            session_id: vec![],
            suites: vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA],
            compression_methods: vec![0],
            extensions,
        }
    }

    fn server_hello(reneg: Option<Vec<u8>>) -> ServerHello {
        let mut extensions = Extensions::new();
        if let Some(data) = reneg {
            extensions.add(Extension::RenegotiationInfo(data));
        }
        ServerHello {
            version: ProtocolVersion::TLS_V12,
            random: [0; 32],
            session_id: vec![],
            suite: CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            compression_method: 0,
            extensions,
        }
    }

    fn established() -> SecureRenegotiationState {
        let mut s = SecureRenegotiationState::new();
        s.update_client_hello(&client_hello(Some(vec![]))).unwrap();
        s.update_server_hello(&server_hello(Some(vec![]))).unwrap();
        s.update_finished(&[1; 12], &[2; 12]);
        s
    }

    #[test]
    fn test_initial_handshake() {
        let s = established();
        assert!(s.supported());
        assert!(s.renegotiation());
        assert_eq!(s.for_client_hello(), &[1; 12]);
        let mut both = vec![1; 12];
        both.extend_from_slice(&[2; 12]);
        assert_eq!(s.for_server_hello(), both);
    }

    #[test]
    fn test_initial_data_must_be_empty() {
        let mut s = SecureRenegotiationState::new();
        assert!(matches!(
            s.update_client_hello(&client_hello(Some(vec![1]))),
            Err(TlsError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_renegotiation_checks_verify_data() {
        let mut s = established();
        s.update_client_hello(&client_hello(Some(vec![1; 12]))).unwrap();
        let mut both = vec![1; 12];
        both.extend_from_slice(&[2; 12]);
        s.update_server_hello(&server_hello(Some(both))).unwrap();

        let mut s = established();
        assert!(s.update_client_hello(&client_hello(Some(vec![9; 12]))).is_err());
        let mut s = established();
        assert!(s.update_server_hello(&server_hello(Some(vec![1; 12]))).is_err());
    }

    #[test]
    fn test_support_cannot_change() {
        let mut s = established();
        assert!(matches!(
            s.update_client_hello(&client_hello(None)),
            Err(TlsError::HandshakeFailed(_))
        ));

        let mut s = SecureRenegotiationState::new();
        s.update_client_hello(&client_hello(None)).unwrap();
        s.update_server_hello(&server_hello(None)).unwrap();
        assert!(!s.supported());
        assert!(s.update_client_hello(&client_hello(Some(vec![]))).is_err());
    }
}
