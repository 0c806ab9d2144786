//! The connection object applications drive.
//!
//! A [`Channel`] is sans-IO: the application feeds it bytes read from the
//! transport with [`Channel::received_data`], and everything it needs to
//! write comes out through the output callback. Decrypted data, alerts and
//! heartbeat responses are delivered through the data callback.
//!
//! Client and server share [`ChannelCore`], which owns the record layer,
//! the in-progress [`HandshakeState`] and the connection flags. The
//! role-specific handshake logic lives behind [`Endpoint`].

mod heartbeat;

use std::sync::Arc;

use bastion_types::TlsError;

use crate::alert::{Alert, AlertDescription};
use crate::config::Policy;
use crate::credentials::{Certificate, CredentialsManager};
use crate::crypt::random::{RandomSource, SystemRandom};
use crate::crypt::registry::AlgorithmRegistry;
use crate::handshake::client::ClientEndpoint;
use crate::handshake::renegotiation::SecureRenegotiationState;
use crate::handshake::server::ServerEndpoint;
use crate::handshake::state::HandshakeState;
use crate::handshake::HandshakeType;
use crate::record::{ContentType, OutputFn, ReadOutcome, RecordReader, RecordWriter};
use crate::session::{Session, SessionManager};
use crate::{ProtocolVersion, TlsRole};

use heartbeat::{decode_heartbeat, encode_heartbeat, HeartbeatType, MIN_PADDING_LEN};

pub use heartbeat::MAX_PAYLOAD_LEN as MAX_HEARTBEAT_PAYLOAD_LEN;

// ---------------------------------------------------------------------------
// Callbacks and collaborators
// ---------------------------------------------------------------------------

/// Something the channel delivers to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent<'a> {
    ApplicationData(&'a [u8]),
    Alert(Alert),
    HeartbeatPayload(&'a [u8]),
}

pub type DataFn = Box<dyn FnMut(ChannelEvent<'_>) + Send>;

/// Called when a handshake completes. Returning `true` keeps the session
/// for resumption; `false` drops it from the session manager.
pub type HandshakeFn = Box<dyn FnMut(&Session) -> bool + Send>;

/// Client side NPN: picks one of the protocols the server advertised.
pub type NextProtocolFn = Box<dyn FnMut(&[String]) -> String + Send>;

/// The application's three hooks.
pub struct Callbacks {
    pub output: OutputFn,
    pub data: DataFn,
    pub handshake: HandshakeFn,
}

impl Callbacks {
    pub fn new(output: OutputFn, data: DataFn, handshake: HandshakeFn) -> Self {
        Self {
            output,
            data,
            handshake,
        }
    }
}

/// Collaborators shared between connections.
#[derive(Clone)]
pub struct ChannelContext {
    pub policy: Arc<Policy>,
    pub credentials: Arc<dyn CredentialsManager>,
    pub session_manager: Arc<dyn SessionManager>,
    pub rng: Arc<dyn RandomSource>,
    pub registry: Arc<AlgorithmRegistry>,
}

impl ChannelContext {
    /// System randomness and the default algorithm registry.
    pub fn new(
        policy: Arc<Policy>,
        credentials: Arc<dyn CredentialsManager>,
        session_manager: Arc<dyn SessionManager>,
    ) -> Self {
        Self {
            policy,
            credentials,
            session_manager,
            rng: Arc::new(SystemRandom),
            registry: Arc::new(AlgorithmRegistry::with_defaults()),
        }
    }

    pub fn with_rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_registry(mut self, registry: Arc<AlgorithmRegistry>) -> Self {
        self.registry = registry;
        self
    }
}

// ---------------------------------------------------------------------------
// Shared connection state
// ---------------------------------------------------------------------------

/// Connection state shared by the client and server roles.
pub struct ChannelCore {
    pub(crate) policy: Arc<Policy>,
    pub(crate) credentials: Arc<dyn CredentialsManager>,
    pub(crate) session_manager: Arc<dyn SessionManager>,
    pub(crate) rng: Arc<dyn RandomSource>,

    pub(crate) writer: RecordWriter,
    pub(crate) reader: RecordReader,
    /// Present only while a handshake is in progress.
    pub(crate) state: Option<HandshakeState>,
    pub(crate) secure_renegotiation: SecureRenegotiationState,

    data_fn: DataFn,
    pub(crate) handshake_fn: HandshakeFn,

    pub(crate) peer_certs: Vec<Certificate>,
    pub(crate) next_protocol: String,
    pub(crate) active_version: Option<ProtocolVersion>,

    pub(crate) handshake_completed: bool,
    pub(crate) connection_closed: bool,
    /// Both sides advertised the heartbeat extension.
    pub(crate) heartbeat_negotiated: bool,
    /// The peer allows us to send heartbeat requests.
    pub(crate) heartbeat_sending_allowed: bool,
}

impl ChannelCore {
    fn new(ctx: ChannelContext, callbacks: Callbacks) -> Self {
        let writer = RecordWriter::new(callbacks.output, ctx.registry.clone(), ctx.rng.clone());
        let reader = RecordReader::new(ctx.registry);
        Self {
            policy: ctx.policy,
            credentials: ctx.credentials,
            session_manager: ctx.session_manager,
            rng: ctx.rng,
            writer,
            reader,
            state: None,
            secure_renegotiation: SecureRenegotiationState::new(),
            data_fn: callbacks.data,
            handshake_fn: callbacks.handshake,
            peer_certs: Vec::new(),
            next_protocol: String::new(),
            active_version: None,
            handshake_completed: false,
            connection_closed: false,
            heartbeat_negotiated: false,
            heartbeat_sending_allowed: false,
        }
    }

    /// Record the end of a handshake. The state has already been taken.
    pub(crate) fn handshake_complete(&mut self, version: ProtocolVersion) {
        log::debug!("handshake complete, {version}");
        self.handshake_completed = true;
        self.active_version = Some(version);
    }

    /// Send `alert`. A fatal alert or close_notify ends the connection;
    /// no_renegotiation abandons the handshake in progress.
    pub(crate) fn send_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        if !self.connection_closed {
            log::debug!("sending alert {:?} {:?}", alert.level, alert.description);
            self.writer.send_alert(alert)?;
        }
        if alert.description == AlertDescription::NoRenegotiation {
            self.state = None;
        }
        if alert.is_fatal() || alert.description == AlertDescription::CloseNotify {
            self.shutdown();
        }
        Ok(())
    }

    /// Tear down after a local error: send the matching fatal alert (unless
    /// the error came from the peer or the application), then close.
    fn fail(&mut self, err: TlsError) -> TlsError {
        let send = !matches!(
            err,
            TlsError::AlertReceived(_) | TlsError::ConnectionClosed
        );
        if send && !self.connection_closed {
            let alert = Alert::fatal(AlertDescription::from(&err));
            log::debug!("fatal error ({err}), sending {:?}", alert.description);
            if let Err(e) = self.writer.send_alert(alert) {
                log::debug!("could not send alert: {e}");
            }
        }
        self.shutdown();
        err
    }

    /// Permanently close the connection and drop all key material.
    fn shutdown(&mut self) {
        self.connection_closed = true;
        self.state = None;
        self.writer.reset();
        self.reader.reset();
    }

    fn process_record<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<(), TlsError> {
        match content_type {
            ContentType::Handshake | ContentType::ChangeCipherSpec => {
                self.read_handshake(endpoint, content_type, payload)
            }
            ContentType::ApplicationData => {
                if !self.handshake_completed {
                    return Err(TlsError::UnexpectedMessage(
                        "application data before the handshake completed".into(),
                    ));
                }
                if !payload.is_empty() {
                    (self.data_fn)(ChannelEvent::ApplicationData(payload));
                }
                Ok(())
            }
            ContentType::Alert => self.process_alert(payload),
            ContentType::Heartbeat => self.process_heartbeat(payload),
        }
    }

    /// Feed handshake bytes (or a ChangeCipherSpec) to the endpoint, one
    /// complete message at a time.
    fn read_handshake<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<(), TlsError> {
        if content_type == ContentType::ChangeCipherSpec {
            let state = self.state.take().ok_or_else(|| {
                TlsError::UnexpectedMessage("ChangeCipherSpec outside a handshake".into())
            })?;
            if payload.len() != 1 || payload[0] != 1 {
                return Err(TlsError::DecodeError("malformed ChangeCipherSpec".into()));
            }
            // A CCS may not interleave with a partial handshake message.
            if !state.reader.is_empty() {
                return Err(TlsError::UnexpectedMessage(
                    "ChangeCipherSpec inside a handshake message".into(),
                ));
            }
            self.state = endpoint.process_handshake_msg(self, state, HandshakeType::HandshakeCcs, &[])?;
            return Ok(());
        }

        let mut state = match self.state.take() {
            Some(state) => state,
            None => endpoint.new_handshake_state(self),
        };
        state.reader.add(payload);
        loop {
            let Some((ty, body)) = state.reader.next_message()? else {
                self.state = Some(state);
                return Ok(());
            };
            let pending = state.reader.take();
            match endpoint.process_handshake_msg(self, state, ty, &body)? {
                Some(mut next) => {
                    next.reader.prepend(pending);
                    state = next;
                }
                None if pending.is_empty() || self.connection_closed => return Ok(()),
                // Bytes after the message that ended this handshake start
                // the next one.
                None => {
                    state = endpoint.new_handshake_state(self);
                    state.reader = pending;
                }
            }
        }
    }

    /// An SSLv2-format ClientHello. Only valid as the very first message
    /// of the connection.
    fn read_sslv2_hello<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        body: &[u8],
    ) -> Result<(), TlsError> {
        if self.state.is_some() || self.handshake_completed {
            return Err(TlsError::UnexpectedMessage(
                "SSLv2 hello after the handshake started".into(),
            ));
        }
        let state = endpoint.new_handshake_state(self);
        self.state = endpoint.process_handshake_msg(self, state, HandshakeType::ClientHelloSslv2, body)?;
        Ok(())
    }

    fn process_alert(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        let alert = Alert::decode(payload)?;
        log::debug!("received alert {:?} {:?}", alert.level, alert.description);

        if alert.description == AlertDescription::NoRenegotiation && self.handshake_completed {
            self.state = None;
        }

        (self.data_fn)(ChannelEvent::Alert(alert));

        if alert.description == AlertDescription::CloseNotify {
            // Reply in kind.
            return self.send_alert(Alert::warning(AlertDescription::CloseNotify));
        }
        if alert.is_fatal() {
            self.shutdown();
            return Err(TlsError::AlertReceived(format!("{:?}", alert.description)));
        }
        Ok(())
    }

    fn process_heartbeat(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        if !self.heartbeat_negotiated {
            return Err(TlsError::UnexpectedMessage(
                "heartbeat without a negotiated heartbeat extension".into(),
            ));
        }
        if !self.handshake_completed {
            log::debug!("ignoring heartbeat before the first handshake completed");
            return Ok(());
        }
        match decode_heartbeat(payload) {
            Some((HeartbeatType::Request, data)) => {
                let padding = self.rng.random_vec(MIN_PADDING_LEN)?;
                let response = encode_heartbeat(HeartbeatType::Response, data, &padding)?;
                self.writer.send(ContentType::Heartbeat, &response)
            }
            Some((HeartbeatType::Response, data)) => {
                (self.data_fn)(ChannelEvent::HeartbeatPayload(data));
                Ok(())
            }
            None => {
                log::debug!("discarding malformed heartbeat of {} bytes", payload.len());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCore")
            .field("state", &self.state)
            .field("active_version", &self.active_version)
            .field("handshake_completed", &self.handshake_completed)
            .field("connection_closed", &self.connection_closed)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// The role-specific half of a channel: the client or server handshake.
pub trait Endpoint: Send {
    const ROLE: TlsRole;

    /// A fresh state for a handshake the peer started.
    fn new_handshake_state(&self, core: &ChannelCore) -> HandshakeState;

    /// Process one complete handshake message (or a ChangeCipherSpec as
    /// [`HandshakeType::HandshakeCcs`]). Returns the state to keep, or
    /// `None` once the handshake has completed or been abandoned.
    fn process_handshake_msg(
        &mut self,
        core: &mut ChannelCore,
        state: HandshakeState,
        ty: HandshakeType,
        body: &[u8],
    ) -> Result<Option<HandshakeState>, TlsError>;

    /// Start a new handshake on an established connection.
    fn renegotiate(&mut self, core: &mut ChannelCore, force_full: bool) -> Result<(), TlsError>;
}

/// A TLS connection in either role.
pub struct Channel<E: Endpoint> {
    core: ChannelCore,
    endpoint: E,
}

pub type Client = Channel<ClientEndpoint>;
pub type Server = Channel<ServerEndpoint>;

impl Channel<ClientEndpoint> {
    /// Create a client and send its first ClientHello. `hostname` is sent
    /// as SNI and keys the session cache; it may be empty.
    pub fn new(
        ctx: ChannelContext,
        callbacks: Callbacks,
        hostname: &str,
        next_protocol: Option<NextProtocolFn>,
    ) -> Result<Self, TlsError> {
        let mut core = ChannelCore::new(ctx, callbacks);
        let mut endpoint = ClientEndpoint::new(hostname, next_protocol);
        if let Err(e) = endpoint.start(&mut core) {
            return Err(core.fail(e));
        }
        Ok(Self { core, endpoint })
    }
}

impl Channel<ServerEndpoint> {
    /// Create a server waiting for a ClientHello. A non-empty
    /// `next_protocols` list is advertised to NPN-capable clients.
    pub fn new(ctx: ChannelContext, callbacks: Callbacks, next_protocols: Vec<String>) -> Self {
        Self {
            core: ChannelCore::new(ctx, callbacks),
            endpoint: ServerEndpoint::new(next_protocols),
        }
    }
}

impl<E: Endpoint> Channel<E> {
    /// Process bytes from the transport.
    ///
    /// Returns a hint of how many more bytes complete the current record,
    /// or 0 when the input ended on a record boundary. Any error is fatal:
    /// the matching alert has been sent and the channel is closed.
    pub fn received_data(&mut self, input: &[u8]) -> Result<usize, TlsError> {
        if self.core.connection_closed {
            return Err(TlsError::ConnectionClosed);
        }
        match self.process_input(input) {
            Ok(needed) => Ok(needed),
            Err(e) => Err(self.core.fail(e)),
        }
    }

    fn process_input(&mut self, mut input: &[u8]) -> Result<usize, TlsError> {
        loop {
            let (outcome, consumed) = self.core.reader.read_record(input)?;
            input = &input[consumed..];
            match outcome {
                ReadOutcome::NeedMore(needed) => return Ok(needed),
                ReadOutcome::Record {
                    content_type,
                    payload,
                } => {
                    log::trace!("record {content_type:?}, {} bytes", payload.len());
                    self.core
                        .process_record(&mut self.endpoint, content_type, &payload)?;
                    if self.core.connection_closed || input.is_empty() {
                        return Ok(0);
                    }
                }
                ReadOutcome::Sslv2ClientHello(body) => {
                    self.core.read_sslv2_hello(&mut self.endpoint, &body)?;
                    if self.core.connection_closed || input.is_empty() {
                        return Ok(0);
                    }
                }
            }
        }
    }

    /// Send application data.
    pub fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if self.core.connection_closed {
            return Err(TlsError::ConnectionClosed);
        }
        if !self.core.handshake_completed {
            return Err(TlsError::InvalidState(
                "data cannot be sent before the handshake completes".into(),
            ));
        }
        match self.core.writer.send(ContentType::ApplicationData, data) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.core.fail(e)),
        }
    }

    /// Send close_notify and close the connection.
    pub fn close(&mut self) -> Result<(), TlsError> {
        if self.core.connection_closed {
            return Ok(());
        }
        self.core
            .send_alert(Alert::warning(AlertDescription::CloseNotify))
    }

    /// Send an alert. A fatal alert closes the connection.
    pub fn send_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        self.core.send_alert(alert)
    }

    /// Start a new handshake on the established connection. With
    /// `force_full` the session is not resumed. A no-op while a handshake
    /// is already in progress.
    pub fn renegotiate(&mut self, force_full: bool) -> Result<(), TlsError> {
        if self.core.connection_closed {
            return Err(TlsError::ConnectionClosed);
        }
        if !self.core.handshake_completed {
            return Err(TlsError::InvalidState(
                "cannot renegotiate before the first handshake completes".into(),
            ));
        }
        if self.core.state.is_some() {
            log::debug!("renegotiation requested during a handshake, ignoring");
            return Ok(());
        }
        match self.endpoint.renegotiate(&mut self.core, force_full) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.core.fail(e)),
        }
    }

    /// Send a heartbeat request carrying `payload`. Does nothing unless the
    /// handshake has completed and the peer agreed to receive heartbeats.
    pub fn heartbeat(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        if !self.is_active() || !self.core.heartbeat_sending_allowed {
            return Ok(());
        }
        if payload.len() > MAX_HEARTBEAT_PAYLOAD_LEN {
            return Err(TlsError::InvalidState("heartbeat payload too large".into()));
        }
        let result = self
            .core
            .rng
            .random_vec(MIN_PADDING_LEN)
            .and_then(|padding| encode_heartbeat(HeartbeatType::Request, payload, &padding))
            .and_then(|msg| self.core.writer.send(ContentType::Heartbeat, &msg));
        result.map_err(|e| self.core.fail(e))
    }

    /// The handshake has completed and the connection is open.
    pub fn is_active(&self) -> bool {
        self.core.handshake_completed && !self.core.connection_closed
    }

    pub fn is_closed(&self) -> bool {
        self.core.connection_closed
    }

    /// The peer's certificate chain, leaf first. Empty for anonymous and
    /// PSK suites, and for a server that did not request client auth.
    pub fn peer_cert_chain(&self) -> &[Certificate] {
        &self.core.peer_certs
    }

    /// The protocol chosen by NPN, or empty.
    pub fn next_protocol(&self) -> &str {
        &self.core.next_protocol
    }

    /// The negotiated version of the last completed handshake.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.core.active_version
    }

    pub fn policy(&self) -> &Policy {
        &self.core.policy
    }

    pub fn role(&self) -> TlsRole {
        E::ROLE
    }
}

impl<E: Endpoint> std::fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("role", &E::ROLE)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
