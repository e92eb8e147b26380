//! Session coordinator: binds a byte-oriented transport to one session's
//! state machine, feeding inbound bytes through the wire framer's
//! incremental parser and driving state transitions by frame type.
//!
//! Grounded on the teacher's `TransportBackend`/`Transport` split (an
//! async send/recv surface implemented per backend), simplified to a plain
//! generic trait bound rather than an enum-dispatch wrapper, since this
//! crate only ever needs one concrete transport per coordinator instance.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use triglot_session::{SessionState, StateMachine, TransitionError};
use triglot_wire::{Frame, FrameFlags, FrameType, FramerConfig, IncrementalParser, WireError};

pub mod mem;
pub use mem::MemTransport;

pub trait Transport: Send {
    fn send(
        &mut self,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = std::io::Result<()>> + Send;
    fn recv(
        &mut self,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = std::io::Result<usize>> + Send;
}

pub type AuthValidator = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;
pub type CommandHandler = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(10),
            max_missed_heartbeats: 3,
        }
    }
}

#[derive(Debug)]
pub enum CoordinatorError {
    Transition(TransitionError),
    Wire(WireError),
    AuthRejected,
    UnexpectedFrameType(FrameType),
    Transport(std::io::Error),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::Transition(e) => write!(f, "{e}"),
            CoordinatorError::Wire(e) => write!(f, "{e}"),
            CoordinatorError::AuthRejected => write!(f, "peer credential was rejected"),
            CoordinatorError::UnexpectedFrameType(t) => {
                write!(f, "frame type {t:?} is not valid in the current session state")
            }
            CoordinatorError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<TransitionError> for CoordinatorError {
    fn from(e: TransitionError) -> Self {
        CoordinatorError::Transition(e)
    }
}

impl From<WireError> for CoordinatorError {
    fn from(e: WireError) -> Self {
        CoordinatorError::Wire(e)
    }
}

/// A response frame the coordinator wants emitted back to the peer, queued
/// up by `handle_frame` so the async caller can actually write it out. A
/// `Response` reuses the sequence number of the `Command` it answers so the
/// caller can correlate the two; other frame types get a fresh sequence.
pub struct Outbound {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub sequence: Option<u32>,
    pub payload: Vec<u8>,
}

/// What came back for a given COMMAND sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Response(Vec<u8>),
    Error(Vec<u8>),
}

pub struct SessionCoordinator<T: Transport> {
    transport: T,
    state: StateMachine,
    parser: IncrementalParser,
    outbound_sequence: AtomicU32,
    config: CoordinatorConfig,
    auth_validator: AuthValidator,
    command_handler: CommandHandler,
    missed_heartbeats: Mutex<u32>,
    pending_responses: Mutex<std::collections::HashMap<u32, FrameOutcome>>,
}

impl<T: Transport> SessionCoordinator<T> {
    pub fn new(
        transport: T,
        framer_config: FramerConfig,
        config: CoordinatorConfig,
        auth_validator: AuthValidator,
        command_handler: CommandHandler,
    ) -> Self {
        SessionCoordinator {
            transport,
            state: StateMachine::new(),
            parser: IncrementalParser::new(framer_config),
            outbound_sequence: AtomicU32::new(0),
            config,
            auth_validator,
            command_handler,
            missed_heartbeats: Mutex::new(0),
            pending_responses: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.state.current_state()
    }

    fn next_sequence(&self) -> u32 {
        self.outbound_sequence.fetch_add(1, Ordering::Relaxed)
    }

    async fn emit(&mut self, out: Outbound) -> Result<(), CoordinatorError> {
        let sequence = out.sequence.unwrap_or_else(|| self.next_sequence());
        let bytes = triglot_wire::frame(out.frame_type, out.flags, sequence, &out.payload);
        self.transport.send(bytes).await.map_err(CoordinatorError::Transport)
    }

    /// Send a COMMAND frame (client role) and return the sequence number it
    /// was framed with, so the caller can later correlate the RESPONSE.
    pub async fn send_command(&mut self, payload: Vec<u8>) -> Result<u32, CoordinatorError> {
        if self.current_state() != SessionState::Ready {
            return Err(CoordinatorError::UnexpectedFrameType(FrameType::Command));
        }
        let sequence = self.next_sequence();
        let bytes = triglot_wire::frame(FrameType::Command, FrameFlags::empty(), sequence, &payload);
        self.transport.send(bytes).await.map_err(CoordinatorError::Transport)?;
        Ok(sequence)
    }

    /// Emit a frame of any type without a session-state precondition, used
    /// by the initiating side of a HANDSHAKE/AUTH exchange (the client
    /// coordinator's own state only advances once the peer's replies come
    /// back through `pump`).
    pub async fn send_frame(
        &mut self,
        frame_type: FrameType,
        payload: Vec<u8>,
    ) -> Result<u32, CoordinatorError> {
        let sequence = self.next_sequence();
        let bytes = triglot_wire::frame(frame_type, FrameFlags::empty(), sequence, &payload);
        self.transport.send(bytes).await.map_err(CoordinatorError::Transport)?;
        Ok(sequence)
    }

    /// Take the RESPONSE or ERROR outcome previously recorded by `pump` for
    /// the given sequence number, if one has arrived.
    pub fn take_response(&self, sequence: u32) -> Option<FrameOutcome> {
        self.pending_responses.lock().remove(&sequence)
    }

    /// Advance this side's own state machine directly, for the initiating
    /// (client) role: sending a HANDSHAKE/AUTH frame is itself what drives
    /// the local transition, rather than waiting on an inbound echo.
    pub fn client_advance(&mut self, to: SessionState) -> Result<(), CoordinatorError> {
        self.state.transition(to).map_err(CoordinatorError::from)
    }

    /// Read available bytes off the transport into the parser, handling
    /// every frame that becomes complete, in arrival order.
    ///
    /// `FrameTooLarge` is a resource error (spec.md §7): it is reported to
    /// the peer as an ERROR frame and does not itself move the session out
    /// of its current state. Checksum and version errors are protocol
    /// integrity failures: they drive the session to `Error` and are
    /// surfaced to the caller. Either way the parser's buffer is reset so a
    /// single bad frame cannot wedge the stream permanently.
    pub async fn pump(&mut self) -> Result<(), CoordinatorError> {
        let mut buf = [0u8; 4096];
        let n = self.transport.recv(&mut buf).await.map_err(CoordinatorError::Transport)?;
        if n == 0 {
            return Ok(());
        }
        let frames = match self.parser.feed(&buf[..n]) {
            Ok(frames) => frames,
            Err(WireError::FrameTooLarge { payload_length, max }) => {
                self.parser.reset();
                let message = format!("FrameTooLarge:{payload_length}:{max}");
                self.emit(Outbound {
                    frame_type: FrameType::Error,
                    flags: FrameFlags::empty(),
                    sequence: None,
                    payload: message.into_bytes(),
                })
                .await?;
                return Ok(());
            }
            Err(e) => {
                self.parser.reset();
                let _ = self.state.transition(SessionState::Error);
                return Err(CoordinatorError::Wire(e));
            }
        };
        for frame in frames {
            if let Some(out) = self.handle_frame(frame)? {
                self.emit(out).await?;
            }
        }
        Ok(())
    }

    /// Frame-type → transition dispatch per the session coordinator's
    /// responsibilities: HANDSHAKE drives INIT→HANDSHAKE, AUTH validates the
    /// peer credential and drives HANDSHAKE→AUTH→READY, COMMAND requires
    /// READY and drives READY→EXECUTING→READY around invoking the handler,
    /// HEARTBEAT resets the missed-heartbeat counter.
    fn handle_frame(&mut self, frame: Frame) -> Result<Option<Outbound>, CoordinatorError> {
        match frame.header.frame_type {
            FrameType::Handshake => {
                self.state.transition(SessionState::Handshake)?;
                Ok(None)
            }
            FrameType::Auth => {
                self.state.transition(SessionState::Auth)?;
                if (self.auth_validator)(&frame.payload) {
                    self.state.transition(SessionState::Ready)?;
                    Ok(None)
                } else {
                    self.state.transition(SessionState::Error)?;
                    Err(CoordinatorError::AuthRejected)
                }
            }
            FrameType::Command => {
                if self.current_state() != SessionState::Ready {
                    return Err(CoordinatorError::UnexpectedFrameType(FrameType::Command));
                }
                self.state.transition(SessionState::Executing)?;
                let response_payload = (self.command_handler)(&frame.payload);
                self.state.transition(SessionState::Ready)?;
                Ok(Some(Outbound {
                    frame_type: FrameType::Response,
                    flags: FrameFlags::empty(),
                    sequence: Some(frame.header.sequence),
                    payload: response_payload,
                }))
            }
            FrameType::Heartbeat => {
                *self.missed_heartbeats.lock() = 0;
                Ok(None)
            }
            FrameType::Response => {
                self.pending_responses
                    .lock()
                    .insert(frame.header.sequence, FrameOutcome::Response(frame.payload));
                Ok(None)
            }
            FrameType::Error => {
                // Client-role frame: surfaced to callers via `pump`'s own
                // error path is not appropriate here since the peer (not
                // us) raised it; record it alongside responses so `invoke`
                // callers can still observe it by sequence number.
                self.pending_responses
                    .lock()
                    .insert(frame.header.sequence, FrameOutcome::Error(frame.payload));
                Ok(None)
            }
        }
    }

    /// Call on every heartbeat interval tick. Returns `Err` once
    /// `max_missed_heartbeats` consecutive ticks passed without a
    /// heartbeat frame, having already driven the session to `Error`.
    pub fn on_heartbeat_tick(&mut self) -> Result<(), CoordinatorError> {
        let mut missed = self.missed_heartbeats.lock();
        *missed += 1;
        if *missed >= self.config.max_missed_heartbeats {
            drop(missed);
            self.state.transition(SessionState::Error)?;
            return Err(CoordinatorError::Transition(TransitionError::InvalidTransition {
                from: SessionState::Ready,
                to: SessionState::Error,
            }));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }
}
