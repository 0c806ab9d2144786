//! Credentials collaborator: certificates, private keys, PSKs and SRP
//! material, supplied by the application.
//!
//! Certificate parsing and chain validation live behind this trait; the
//! handshake only ever sees opaque DER certificates and the public key the
//! manager extracts from them.

use bastion_types::TlsError;

use crate::crypt::ciphersuite::SigAlgo;
use crate::crypt::kex::DhGroup;
use crate::crypt::signature::{PrivateKey, PublicKey};
use crate::TlsRole;

/// A DER-encoded X.509 certificate.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Certificate(pub Vec<u8>);

impl Certificate {
    pub fn der(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Certificate({} bytes)", self.0.len())
    }
}

/// Stored SRP verifier for one identity.
#[derive(Debug, Clone)]
pub struct SrpVerifier {
    pub group: DhGroup,
    pub verifier: Vec<u8>,
    pub salt: Vec<u8>,
}

/// The source of every credential the handshake needs.
///
/// `context` strings name the purpose of a lookup. PSK lookups use
/// `"tls-client"` / `"tls-server"`, and the session ticket key is
/// requested as `psk(Server, "session-ticket", "")`.
pub trait CredentialsManager: Send + Sync {
    /// A chain whose leaf key is one of `key_types`, leaf first. Empty if
    /// none is available.
    fn cert_chain(&self, key_types: &[SigAlgo], role: TlsRole, hostname: &str) -> Vec<Certificate> {
        let _ = (key_types, role, hostname);
        Vec::new()
    }

    fn cert_chain_single_type(
        &self,
        key_type: SigAlgo,
        role: TlsRole,
        hostname: &str,
    ) -> Vec<Certificate> {
        self.cert_chain(&[key_type], role, hostname)
    }

    fn private_key_for(
        &self,
        cert: &Certificate,
        role: TlsRole,
        hostname: &str,
    ) -> Option<PrivateKey> {
        let _ = (cert, role, hostname);
        None
    }

    /// Validate a peer chain. `role` is our own role.
    fn verify_certificate_chain(
        &self,
        role: TlsRole,
        hostname: &str,
        chain: &[Certificate],
    ) -> Result<(), TlsError> {
        let _ = (role, hostname, chain);
        Err(TlsError::BadCertificate("no trust anchors configured".into()))
    }

    /// The subject public key of `cert`.
    fn subject_public_key(&self, cert: &Certificate) -> Result<PublicKey, TlsError>;

    /// DER distinguished names of the CAs we accept client certificates
    /// from. A non-empty list makes the server request client auth.
    fn trusted_certificate_authorities(&self, role: TlsRole, hostname: &str) -> Vec<Vec<u8>> {
        let _ = (role, hostname);
        Vec::new()
    }

    /// The shared secret for `identity` in `context`.
    fn psk(&self, role: TlsRole, context: &str, identity: &str) -> Result<Vec<u8>, TlsError> {
        let _ = (role, context, identity);
        Err(TlsError::UnknownPskIdentity(format!(
            "no PSK for identity {identity:?}"
        )))
    }

    fn psk_identity_hint(&self, role: TlsRole, context: &str) -> String {
        let _ = (role, context);
        String::new()
    }

    /// The identity a client presents, given the server's hint.
    fn psk_identity(&self, role: TlsRole, context: &str, identity_hint: &str) -> String {
        let _ = (role, context, identity_hint);
        String::new()
    }

    /// Whether a client should offer SRP suites to `hostname`.
    fn attempt_srp(&self, role: TlsRole, hostname: &str) -> bool {
        let _ = (role, hostname);
        false
    }

    fn srp_identifier(&self, role: TlsRole, hostname: &str) -> String {
        let _ = (role, hostname);
        String::new()
    }

    fn srp_password(&self, role: TlsRole, hostname: &str, identifier: &str) -> String {
        let _ = (role, hostname, identifier);
        String::new()
    }

    fn srp_verifier(&self, role: TlsRole, hostname: &str, identifier: &str) -> Option<SrpVerifier> {
        let _ = (role, hostname, identifier);
        None
    }
}

/// Key used to seal session tickets, if the credentials provide one.
pub(crate) fn session_ticket_key(creds: &dyn CredentialsManager) -> Option<Vec<u8>> {
    match creds.psk(TlsRole::Server, "session-ticket", "") {
        Ok(key) if key.len() == 32 => Some(key),
        Ok(key) => {
            log::warn!("session ticket key has {} bytes, need 32", key.len());
            None
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl CredentialsManager for Bare {
        fn subject_public_key(&self, _cert: &Certificate) -> Result<PublicKey, TlsError> {
            Err(TlsError::BadCertificate("unparseable".into()))
        }
    }

    struct Tickets(usize);

    impl CredentialsManager for Tickets {
        fn subject_public_key(&self, _cert: &Certificate) -> Result<PublicKey, TlsError> {
            Err(TlsError::BadCertificate("unparseable".into()))
        }

        fn psk(&self, _role: TlsRole, context: &str, _identity: &str) -> Result<Vec<u8>, TlsError> {
            assert_eq!(context, "session-ticket");
            Ok(vec![7; self.0])
        }
    }

    #[test]
    fn test_defaults_refuse() {
        let c = Bare;
        assert!(c.cert_chain(&[SigAlgo::Rsa], TlsRole::Server, "").is_empty());
        assert!(matches!(
            c.verify_certificate_chain(TlsRole::Client, "x", &[]),
            Err(TlsError::BadCertificate(_))
        ));
        assert!(matches!(
            c.psk(TlsRole::Server, "tls-server", "bob"),
            Err(TlsError::UnknownPskIdentity(_))
        ));
        assert!(!c.attempt_srp(TlsRole::Client, "x"));
        assert!(session_ticket_key(&c).is_none());
    }

    #[test]
    fn test_ticket_key_length_checked() {
        assert_eq!(session_ticket_key(&Tickets(32)).unwrap().len(), 32);
        assert!(session_ticket_key(&Tickets(16)).is_none());
    }

    #[test]
    fn test_certificate_debug_hides_bytes() {
        let c = Certificate(vec![0x30, 0x82, 0x01]);
        assert_eq!(format!("{c:?}"), "Certificate(3 bytes)");
        assert_eq!(c.der(), &[0x30, 0x82, 0x01]);
    }
}
