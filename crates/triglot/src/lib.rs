//! Registry façade: a thin set of public entry points — `register_service`,
//! `resolve`, `invoke`, `shutdown` — bundling a shared [`Registry`] with a
//! table of live [`SessionCoordinator`]s, one per resolved fingerprint.
//!
//! Grounded on the teacher's own top-level `rapace` facade crate, which
//! bundles `rapace-core`'s session/transport machinery behind a handful of
//! entry points backed by a shared registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use triglot_coordinator::{
    AuthValidator, CommandHandler, CoordinatorConfig, CoordinatorError, FrameOutcome,
    SessionCoordinator, Transport,
};
use triglot_registry::{
    EndpointSnapshot, Fingerprint, Registry, RegistryError, ResolverConfig, ServiceEndpoint,
};
use triglot_session::{SessionState, TransitionError};
use triglot_wire::{FrameType, FramerConfig, WireError};

pub use triglot_coordinator::MemTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    NotRegistered,
    ChecksumMismatch,
    VersionMismatch,
    FrameTooLarge,
    InvalidTransition,
    IntegrityFailure,
    PermissionChainViolation,
    HashMismatch,
    BackpressureTimeout,
    Timeout,
    Cancelled,
    AlreadyPresent,
    ReentrantTransition,
    BadFrameType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
}

impl RuntimeError {
    fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        RuntimeError { kind, message: message.into() }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RuntimeError {}

impl From<RegistryError> for RuntimeError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyPresent => {
                RuntimeError::new(RuntimeErrorKind::AlreadyPresent, e.to_string())
            }
            RegistryError::NotFound => {
                RuntimeError::new(RuntimeErrorKind::NotRegistered, e.to_string())
            }
        }
    }
}

impl From<WireError> for RuntimeError {
    fn from(e: WireError) -> Self {
        let kind = match &e {
            WireError::FrameTooLarge { .. } => RuntimeErrorKind::FrameTooLarge,
            WireError::ChecksumMismatch { .. } => RuntimeErrorKind::ChecksumMismatch,
            WireError::VersionMismatch { .. } => RuntimeErrorKind::VersionMismatch,
            WireError::BadFrameType(_) => RuntimeErrorKind::BadFrameType,
        };
        RuntimeError::new(kind, e.to_string())
    }
}

impl From<TransitionError> for RuntimeError {
    fn from(e: TransitionError) -> Self {
        let kind = match &e {
            TransitionError::InvalidTransition { .. } | TransitionError::Locked(_) => {
                RuntimeErrorKind::InvalidTransition
            }
            TransitionError::ReentrantTransition => RuntimeErrorKind::ReentrantTransition,
            TransitionError::StaleSnapshot | TransitionError::IntegrityFailure => {
                RuntimeErrorKind::IntegrityFailure
            }
        };
        RuntimeError::new(kind, e.to_string())
    }
}

impl From<CoordinatorError> for RuntimeError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Transition(t) => t.into(),
            CoordinatorError::Wire(w) => w.into(),
            CoordinatorError::AuthRejected => {
                RuntimeError::new(RuntimeErrorKind::InvalidTransition, "peer credential was rejected")
            }
            CoordinatorError::UnexpectedFrameType(t) => RuntimeError::new(
                RuntimeErrorKind::InvalidTransition,
                format!("frame type {t:?} is not valid in the current session state"),
            ),
            CoordinatorError::Transport(err) => {
                RuntimeError::new(RuntimeErrorKind::Cancelled, format!("transport error: {err}"))
            }
        }
    }
}

/// Interprets an ERROR frame's payload the way this runtime encodes one
/// from `SessionCoordinator::pump` (`"<Kind>:..."`, see that crate's
/// `FrameTooLarge` handling) into a `RuntimeErrorKind`.
fn error_kind_from_payload(payload: &[u8]) -> RuntimeErrorKind {
    let text = String::from_utf8_lossy(payload);
    let tag = text.split(':').next().unwrap_or("");
    match tag {
        "FrameTooLarge" => RuntimeErrorKind::FrameTooLarge,
        "ChecksumMismatch" => RuntimeErrorKind::ChecksumMismatch,
        "VersionMismatch" => RuntimeErrorKind::VersionMismatch,
        "HashMismatch" => RuntimeErrorKind::HashMismatch,
        "PermissionChainViolation" => RuntimeErrorKind::PermissionChainViolation,
        _ => RuntimeErrorKind::InvalidTransition,
    }
}

/// How a newly-resolved fingerprint gets a live session: a fresh transport,
/// the credential blob to present during AUTH, an auth validator (for the
/// in-process peer role when applicable), and a command handler installed
/// on the coordinator for any inbound COMMAND it receives.
pub struct SessionFactory<T: Transport> {
    pub transport_factory: Box<dyn Fn(&Fingerprint) -> T + Send + Sync>,
    pub credential_provider: Box<dyn Fn(&Fingerprint) -> Vec<u8> + Send + Sync>,
    pub auth_validator_factory: Box<dyn Fn() -> AuthValidator + Send + Sync>,
    pub command_handler_factory: Box<dyn Fn() -> CommandHandler + Send + Sync>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeConfig {
    pub resolver: ResolverConfig,
    pub framer: FramerConfig,
    pub coordinator: CoordinatorConfig,
    pub handshake_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            resolver: ResolverConfig::default(),
            framer: FramerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// The C8 façade: a shared resolver plus a table of live session
/// coordinators, opened lazily on first `resolve`.
pub struct Runtime<T: Transport> {
    registry: Registry,
    sessions: AsyncMutex<HashMap<Fingerprint, SessionCoordinator<T>>>,
    shutting_down: RwLock<bool>,
    config: RuntimeConfig,
    factory: SessionFactory<T>,
}

impl<T: Transport> Runtime<T> {
    pub fn new(config: RuntimeConfig, factory: SessionFactory<T>) -> Self {
        Runtime {
            registry: Registry::new(config.resolver),
            sessions: AsyncMutex::new(HashMap::new()),
            shutting_down: RwLock::new(false),
            config,
            factory,
        }
    }

    pub fn register_service(
        &self,
        fingerprint: &Fingerprint,
        endpoint: ServiceEndpoint,
    ) -> Result<(), RuntimeError> {
        self.registry.register(fingerprint, endpoint).map_err(Into::into)
    }

    /// Look up a fingerprint's endpoint, opening a new session for it via
    /// the `SessionFactory` if one is not already live.
    pub async fn resolve(&self, fingerprint: &Fingerprint) -> Result<EndpointSnapshot, RuntimeError> {
        if *self.shutting_down.read() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::Cancelled,
                "runtime is shutting down",
            ));
        }

        let snapshot = self.registry.lookup(fingerprint).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::NotRegistered,
                format!("no service registered for {fingerprint}"),
            )
        })?;

        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(fingerprint) {
            let transport = (self.factory.transport_factory)(fingerprint);
            let mut coordinator = SessionCoordinator::new(
                transport,
                self.config.framer,
                self.config.coordinator,
                (self.factory.auth_validator_factory)(),
                (self.factory.command_handler_factory)(),
            );
            let credential = (self.factory.credential_provider)(fingerprint);
            self.drive_handshake(&mut coordinator, credential).await?;
            sessions.insert(fingerprint.clone(), coordinator);
        }
        Ok(snapshot)
    }

    async fn drive_handshake(
        &self,
        coordinator: &mut SessionCoordinator<T>,
        credential: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        coordinator.send_frame(FrameType::Handshake, Vec::new()).await?;
        coordinator.client_advance(SessionState::Handshake)?;
        coordinator.send_frame(FrameType::Auth, credential).await?;
        coordinator.client_advance(SessionState::Auth)?;
        coordinator.client_advance(SessionState::Ready)?;
        Ok(())
    }

    /// Send a COMMAND to an already-resolved fingerprint's session and wait
    /// (up to `timeout`) for the matching RESPONSE or ERROR, correlated by
    /// sequence number.
    pub async fn invoke(
        &self,
        fingerprint: &Fingerprint,
        command_bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut sessions = self.sessions.lock().await;
        let coordinator = sessions.get_mut(fingerprint).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::NotRegistered,
                format!("no open session for {fingerprint}; call resolve first"),
            )
        })?;

        let sequence = coordinator.send_command(command_bytes).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(outcome) = coordinator.take_response(sequence) {
                return match outcome {
                    FrameOutcome::Response(payload) => Ok(payload),
                    FrameOutcome::Error(payload) => Err(RuntimeError::new(
                        error_kind_from_payload(&payload),
                        String::from_utf8_lossy(&payload).into_owned(),
                    )),
                };
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::Timeout,
                    format!("invoke timed out waiting for sequence {sequence}"),
                ));
            }
            match tokio::time::timeout(remaining, coordinator.pump()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::Timeout,
                        format!("invoke timed out waiting for sequence {sequence}"),
                    ))
                }
            }
        }
    }

    /// Idempotent: transitions every open session to `Shutdown` (via
    /// `Error` when it isn't already quiescent) and marks the runtime
    /// closed to further `resolve` calls. Bounded by the caller's own
    /// timeout around this call, since driving N sessions to shutdown is
    /// just N synchronous transitions.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if *self.shutting_down.read() {
            return Ok(());
        }
        *self.shutting_down.write() = true;

        let mut sessions = self.sessions.lock().await;
        for coordinator in sessions.values_mut() {
            match coordinator.current_state() {
                SessionState::Shutdown => {}
                SessionState::Ready | SessionState::Error => {
                    let _ = coordinator.client_advance(SessionState::Shutdown);
                }
                _ => {
                    // INIT/HANDSHAKE/AUTH/EXECUTING have no direct edge to
                    // SHUTDOWN; route through ERROR first, matching the
                    // graph in triglot-session.
                    let _ = coordinator.client_advance(SessionState::Error);
                    let _ = coordinator.client_advance(SessionState::Shutdown);
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
