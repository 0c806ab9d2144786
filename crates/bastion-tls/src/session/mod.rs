//! Resumable sessions, session tickets (RFC 5077), and the session
//! manager collaborator.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use bastion_types::TlsError;
use zeroize::Zeroize;

use crate::credentials::Certificate;
use crate::crypt::random::RandomSource;
use crate::handshake::codec::{put_u16, put_vec16, put_vec24, put_vec8, Reader};
use crate::{CipherSuite, ProtocolVersion, TlsRole};

/// Encoding version byte leading every serialized session.
const SESSION_ENCODING_VERSION: u8 = 1;

const TICKET_NONCE_LEN: usize = 12;
const TICKET_TAG_LEN: usize = 16;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The state needed to resume a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    session_id: Vec<u8>,
    master_secret: Vec<u8>,
    version: ProtocolVersion,
    ciphersuite: CipherSuite,
    compression_method: u8,
    side: TlsRole,
    secure_renegotiation: bool,
    fragment_size: usize,
    peer_certs: Vec<Certificate>,
    session_ticket: Vec<u8>,
    sni_hostname: String,
    srp_identifier: String,
    start_time: u64,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Vec<u8>,
        master_secret: Vec<u8>,
        version: ProtocolVersion,
        ciphersuite: CipherSuite,
        compression_method: u8,
        side: TlsRole,
        secure_renegotiation: bool,
        fragment_size: usize,
        peer_certs: Vec<Certificate>,
        session_ticket: Vec<u8>,
        sni_hostname: String,
        srp_identifier: String,
    ) -> Self {
        Self {
            session_id,
            master_secret,
            version,
            ciphersuite,
            compression_method,
            side,
            secure_renegotiation,
            fragment_size,
            peer_certs,
            session_ticket,
            sni_hostname,
            srp_identifier,
            start_time: now_secs(),
        }
    }

    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn ciphersuite(&self) -> CipherSuite {
        self.ciphersuite
    }

    pub fn compression_method(&self) -> u8 {
        self.compression_method
    }

    /// The side that saved the session.
    pub fn side(&self) -> TlsRole {
        self.side
    }

    pub fn secure_renegotiation(&self) -> bool {
        self.secure_renegotiation
    }

    /// Negotiated fragment limit, 0 if none.
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    pub fn peer_certs(&self) -> &[Certificate] {
        &self.peer_certs
    }

    pub fn session_ticket(&self) -> &[u8] {
        &self.session_ticket
    }

    pub fn sni_hostname(&self) -> &str {
        &self.sni_hostname
    }

    pub fn srp_identifier(&self) -> &str {
        &self.srp_identifier
    }

    /// Seconds since the UNIX epoch at creation.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Age in seconds.
    pub fn session_age(&self) -> u64 {
        now_secs().saturating_sub(self.start_time)
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Serialize to the versioned binary form.
    ///
    /// ```text
    /// u8 encoding_version || u64 start_time || u8 major || u8 minor ||
    /// u16 suite || u8 compression || u8 side || u8 secure_reneg ||
    /// u16 fragment_size || vec8 session_id || vec8 master_secret ||
    /// vec16 ticket || vec16 hostname || vec8 srp_identifier ||
    /// vec24 { vec24 cert }*
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.push(SESSION_ENCODING_VERSION);
        out.extend_from_slice(&self.start_time.to_be_bytes());
        out.extend_from_slice(&self.version.to_bytes());
        put_u16(&mut out, self.ciphersuite.0);
        out.push(self.compression_method);
        out.push(match self.side {
            TlsRole::Client => 1,
            TlsRole::Server => 2,
        });
        out.push(self.secure_renegotiation as u8);
        put_u16(&mut out, self.fragment_size as u16);
        put_vec8(&mut out, &self.session_id);
        put_vec8(&mut out, &self.master_secret);
        put_vec16(&mut out, &self.session_ticket);
        put_vec16(&mut out, self.sni_hostname.as_bytes());
        put_vec8(&mut out, self.srp_identifier.as_bytes());
        let mut certs = Vec::new();
        for c in &self.peer_certs {
            put_vec24(&mut certs, c.der());
        }
        put_vec24(&mut out, &certs);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data, "session");
        let enc_version = r.u8()?;
        if enc_version != SESSION_ENCODING_VERSION {
            return Err(TlsError::DecodeError(format!(
                "unknown session encoding version {enc_version}"
            )));
        }
        let start_time = u64::from_be_bytes(r.array::<8>()?);
        let [major, minor] = r.array::<2>()?;
        let ciphersuite = CipherSuite(r.u16()?);
        let compression_method = r.u8()?;
        let side = match r.u8()? {
            1 => TlsRole::Client,
            2 => TlsRole::Server,
            s => return Err(TlsError::DecodeError(format!("bad session side {s}"))),
        };
        let secure_renegotiation = r.u8()? != 0;
        let fragment_size = r.u16()? as usize;
        let session_id = r.vec8()?.to_vec();
        let master_secret = r.vec8()?.to_vec();
        let session_ticket = r.vec16()?.to_vec();
        let sni_hostname = string(r.vec16()?)?;
        let srp_identifier = string(r.vec8()?)?;
        let mut cr = Reader::new(r.vec24()?, "session certificates");
        let mut peer_certs = Vec::new();
        while !cr.is_empty() {
            peer_certs.push(Certificate(cr.vec24()?.to_vec()));
        }
        r.finish()?;

        Ok(Self {
            session_id,
            master_secret,
            version: ProtocolVersion::new(major, minor),
            ciphersuite,
            compression_method,
            side,
            secure_renegotiation,
            fragment_size,
            peer_certs,
            session_ticket,
            sni_hostname,
            srp_identifier,
            start_time,
        })
    }

    // -----------------------------------------------------------------------
    // Tickets
    // -----------------------------------------------------------------------

    /// Seal into an opaque ticket: `nonce(12) || ciphertext || tag(16)`
    /// under AES-256-GCM with a 32-byte `key`.
    pub fn encrypt(&self, key: &[u8], rng: &dyn RandomSource) -> Result<Vec<u8>, TlsError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| TlsError::Config("session ticket key must be 32 bytes".into()))?;
        let mut nonce = [0u8; TICKET_NONCE_LEN];
        rng.fill(&mut nonce)?;
        let mut plaintext = self.encode();
        let sealed = cipher.encrypt(GenericArray::from_slice(&nonce), plaintext.as_slice());
        plaintext.zeroize();
        let sealed = sealed.map_err(|_| {
            TlsError::CryptoError(bastion_types::CryptoError::AeadTagVerifyFail)
        })?;

        let mut ticket = Vec::with_capacity(TICKET_NONCE_LEN + sealed.len());
        ticket.extend_from_slice(&nonce);
        ticket.extend_from_slice(&sealed);
        Ok(ticket)
    }

    /// Open a ticket. Any failure yields `None`, so the caller falls back
    /// to a full handshake.
    pub fn decrypt(ticket: &[u8], key: &[u8]) -> Option<Self> {
        if ticket.len() < TICKET_NONCE_LEN + TICKET_TAG_LEN {
            return None;
        }
        let cipher = Aes256Gcm::new_from_slice(key).ok()?;
        let (nonce, sealed) = ticket.split_at(TICKET_NONCE_LEN);
        let mut plaintext = cipher.decrypt(GenericArray::from_slice(nonce), sealed).ok()?;
        let session = Self::decode(&plaintext).ok();
        plaintext.zeroize();
        session
    }
}

fn string(bytes: &[u8]) -> Result<String, TlsError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TlsError::DecodeError("session string is not UTF-8".into()))
}

impl Drop for Session {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id.len())
            .field("version", &self.version)
            .field("ciphersuite", &self.ciphersuite)
            .field("side", &self.side)
            .field("sni_hostname", &self.sni_hostname)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Session managers
// ---------------------------------------------------------------------------

/// Storage for resumable sessions, shared across connections.
///
/// Implementations synchronize internally.
pub trait SessionManager: Send + Sync {
    fn load_from_session_id(&self, session_id: &[u8]) -> Option<Session>;

    /// Most recent client session for a server.
    fn load_from_host_info(&self, hostname: &str, port: u16) -> Option<Session>;

    fn save(&self, session: &Session);

    fn remove_entry(&self, session_id: &[u8]);
}

/// Stores nothing; every handshake is a full one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionManager;

impl SessionManager for NoopSessionManager {
    fn load_from_session_id(&self, _session_id: &[u8]) -> Option<Session> {
        None
    }

    fn load_from_host_info(&self, _hostname: &str, _port: u16) -> Option<Session> {
        None
    }

    fn save(&self, _session: &Session) {}

    fn remove_entry(&self, _session_id: &[u8]) {}
}

#[derive(Default)]
struct CacheInner {
    sessions: HashMap<Vec<u8>, Session>,
    /// (hostname, port) to session id.
    by_host: HashMap<(String, u16), Vec<u8>>,
}

/// In-memory session cache with a capacity bound and a lifetime.
pub struct InMemorySessionManager {
    inner: Mutex<CacheInner>,
    max_sessions: usize,
    lifetime: Duration,
}

impl InMemorySessionManager {
    /// Default session lifetime: two hours.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(7200);

    pub fn new(max_sessions: usize) -> Self {
        Self::with_lifetime(max_sessions, Self::DEFAULT_LIFETIME)
    }

    /// A zero `lifetime` means sessions never expire.
    pub fn with_lifetime(max_sessions: usize, lifetime: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_sessions,
            lifetime,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned cache only holds plain data; keep using it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, session: &Session) -> bool {
        !self.lifetime.is_zero() && session.session_age() > self.lifetime.as_secs()
    }

    fn load_locked(&self, inner: &mut CacheInner, session_id: &[u8]) -> Option<Session> {
        let session = inner.sessions.get(session_id)?;
        if self.is_expired(session) {
            inner.sessions.remove(session_id);
            return None;
        }
        Some(session.clone())
    }
}

impl SessionManager for InMemorySessionManager {
    fn load_from_session_id(&self, session_id: &[u8]) -> Option<Session> {
        let mut inner = self.lock();
        self.load_locked(&mut inner, session_id)
    }

    fn load_from_host_info(&self, hostname: &str, port: u16) -> Option<Session> {
        let mut inner = self.lock();
        let id = inner.by_host.get(&(hostname.to_string(), port))?.clone();
        let session = self.load_locked(&mut inner, &id);
        if session.is_none() {
            inner.by_host.remove(&(hostname.to_string(), port));
        }
        session
    }

    fn save(&self, session: &Session) {
        if self.max_sessions == 0 {
            return;
        }
        let mut inner = self.lock();
        let id = session.session_id().to_vec();
        if inner.sessions.len() >= self.max_sessions && !inner.sessions.contains_key(&id) {
            // Evict the oldest entry.
            let oldest = inner
                .sessions
                .iter()
                .min_by_key(|(_, s)| s.start_time())
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                inner.sessions.remove(&k);
                inner.by_host.retain(|_, v| *v != k);
            }
        }
        if session.side() == TlsRole::Client && !session.sni_hostname().is_empty() {
            inner
                .by_host
                .insert((session.sni_hostname().to_string(), 0), id.clone());
        }
        inner.sessions.insert(id, session.clone());
    }

    fn remove_entry(&self, session_id: &[u8]) {
        let mut inner = self.lock();
        inner.sessions.remove(session_id);
        inner.by_host.retain(|_, v| v.as_slice() != session_id);
    }
}

impl std::fmt::Debug for InMemorySessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionManager")
            .field("max_sessions", &self.max_sessions)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}
