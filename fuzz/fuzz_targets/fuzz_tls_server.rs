#![no_main]
use std::sync::Arc;

use bastion_tls::channel::{Callbacks, ChannelContext, ChannelEvent, Server};
use bastion_tls::config::Policy;
use bastion_tls::credentials::{Certificate, CredentialsManager};
use bastion_tls::crypt::signature::PublicKey;
use bastion_tls::session::{NoopSessionManager, Session};
use bastion_tls::{TlsError, TlsRole};
use libfuzzer_sys::fuzz_target;

/// PSK-only server: no certificates, so every suite it can pick is
/// reachable without key material.
struct PskOnly;

impl CredentialsManager for PskOnly {
    fn subject_public_key(&self, cert: &Certificate) -> Result<PublicKey, TlsError> {
        PublicKey::from_spki_der(cert.der())
    }

    fn psk(&self, _role: TlsRole, _context: &str, _identity: &str) -> Result<Vec<u8>, TlsError> {
        Ok(vec![0x11; 16])
    }
}

fuzz_target!(|data: &[u8]| {
    let ctx = ChannelContext::new(
        Arc::new(Policy::default()),
        Arc::new(PskOnly),
        Arc::new(NoopSessionManager),
    );
    let callbacks = Callbacks::new(
        Box::new(|_: &[u8]| {}),
        Box::new(|_: ChannelEvent<'_>| {}),
        Box::new(|_: &Session| true),
    );
    let mut server = Server::new(ctx, callbacks, Vec::new());
    for chunk in data.chunks(512) {
        if server.received_data(chunk).is_err() {
            break;
        }
    }
});
