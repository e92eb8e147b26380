//! Session state machine.
//!
//! A guarded transition graph with per-state `on_exit`/`on_enter` effects,
//! a reentrancy guard (effects cannot drive another transition), per-state
//! locking, and snapshot/restore backed by a BLAKE3 digest over the state id
//! and its version counter.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Handshake,
    Auth,
    Ready,
    Executing,
    Error,
    Shutdown,
}

impl SessionState {
    const ALL: [SessionState; 7] = [
        SessionState::Init,
        SessionState::Handshake,
        SessionState::Auth,
        SessionState::Ready,
        SessionState::Executing,
        SessionState::Error,
        SessionState::Shutdown,
    ];

    fn index(self) -> usize {
        match self {
            SessionState::Init => 0,
            SessionState::Handshake => 1,
            SessionState::Auth => 2,
            SessionState::Ready => 3,
            SessionState::Executing => 4,
            SessionState::Error => 5,
            SessionState::Shutdown => 6,
        }
    }

    fn id(self) -> u8 {
        self.index() as u8
    }
}

fn is_permitted(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Init, Handshake)
            | (Init, Error)
            | (Handshake, Auth)
            | (Handshake, Error)
            | (Auth, Ready)
            | (Auth, Error)
            | (Ready, Executing)
            | (Ready, Shutdown)
            | (Ready, Error)
            | (Executing, Ready)
            | (Executing, Error)
            | (Error, Shutdown)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    InvalidTransition { from: SessionState, to: SessionState },
    ReentrantTransition,
    Locked(SessionState),
    StaleSnapshot,
    IntegrityFailure,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::InvalidTransition { from, to } => {
                write!(f, "transition {from:?} -> {to:?} is not permitted")
            }
            TransitionError::ReentrantTransition => {
                write!(f, "a transition effect attempted to trigger another transition")
            }
            TransitionError::Locked(s) => write!(f, "state {s:?} is locked"),
            TransitionError::StaleSnapshot => write!(f, "snapshot carries a stale version counter"),
            TransitionError::IntegrityFailure => write!(f, "snapshot integrity digest mismatch"),
        }
    }
}

impl std::error::Error for TransitionError {}

pub type Guard = Box<dyn Fn(SessionState, SessionState) -> bool + Send + Sync>;
pub type Effect = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state_id: SessionState,
    pub integrity_digest: [u8; 32],
    pub timestamp: Instant,
    pub version_counter: u64,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub creation_time: Instant,
    pub last_modified: Instant,
    pub transition_count: u64,
    pub integrity_violation_count: u64,
    pub is_locked: bool,
    pub current_digest: [u8; 32],
}

struct Inner {
    state: SessionState,
    version_counters: [u64; 7],
    locked: [bool; 7],
    creation_time: [Instant; 7],
    last_modified: [Instant; 7],
    transition_count: [u64; 7],
    integrity_violation_count: [u64; 7],
}

impl Inner {
    fn new() -> Self {
        let now = Instant::now();
        Inner {
            state: SessionState::Init,
            version_counters: [0; 7],
            locked: [false; 7],
            creation_time: [now; 7],
            last_modified: [now; 7],
            transition_count: [0; 7],
            integrity_violation_count: [0; 7],
        }
    }
}

fn compute_digest(state: SessionState, version: u64) -> [u8; 32] {
    let mut buf = Vec::with_capacity(9);
    buf.push(state.id());
    buf.extend_from_slice(&version.to_le_bytes());
    triglot_hash::digest(&buf)
}

/// A single session's guarded state machine.
///
/// Per spec.md §5 ("Exactly one task writes session mutable fields"), this
/// is built for single-writer use; the internal mutex exists to make
/// diagnostics readable from other tasks, not to support concurrent writers.
pub struct StateMachine {
    inner: Mutex<Inner>,
    in_effect: AtomicBool,
    guards: HashMap<(SessionState, SessionState), Guard>,
    on_exit: HashMap<SessionState, Effect>,
    on_enter: HashMap<SessionState, Effect>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            inner: Mutex::new(Inner::new()),
            in_effect: AtomicBool::new(false),
            guards: HashMap::new(),
            on_exit: HashMap::new(),
            on_enter: HashMap::new(),
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn set_guard(&mut self, from: SessionState, to: SessionState, guard: Guard) {
        self.guards.insert((from, to), guard);
    }

    pub fn set_on_exit(&mut self, state: SessionState, effect: Effect) {
        self.on_exit.insert(state, effect);
    }

    pub fn set_on_enter(&mut self, state: SessionState, effect: Effect) {
        self.on_enter.insert(state, effect);
    }

    pub fn lock_state(&self, state: SessionState) {
        self.inner.lock().locked[state.index()] = true;
    }

    pub fn unlock_state(&self, state: SessionState) {
        self.inner.lock().locked[state.index()] = false;
    }

    pub fn diagnostics(&self, state: SessionState) -> Diagnostics {
        let inner = self.inner.lock();
        let i = state.index();
        Diagnostics {
            creation_time: inner.creation_time[i],
            last_modified: inner.last_modified[i],
            transition_count: inner.transition_count[i],
            integrity_violation_count: inner.integrity_violation_count[i],
            is_locked: inner.locked[i],
            current_digest: compute_digest(state, inner.version_counters[i]),
        }
    }

    /// Attempt a transition to `to`. Runs the outgoing state's `on_exit`
    /// effect, then the incoming state's `on_enter` effect, with neither
    /// holding the internal lock — an effect that calls `transition` again
    /// observes the reentrancy guard and gets `ReentrantTransition` instead
    /// of deadlocking.
    pub fn transition(&self, to: SessionState) -> Result<(), TransitionError> {
        if self
            .in_effect
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TransitionError::ReentrantTransition);
        }

        let result = self.transition_inner(to);
        self.in_effect.store(false, Ordering::SeqCst);
        result
    }

    fn transition_inner(&self, to: SessionState) -> Result<(), TransitionError> {
        let from = {
            let inner = self.inner.lock();
            if inner.locked[inner.state.index()] {
                return Err(TransitionError::Locked(inner.state));
            }
            inner.state
        };

        if !is_permitted(from, to) {
            return Err(TransitionError::InvalidTransition { from, to });
        }
        if let Some(guard) = self.guards.get(&(from, to)) {
            if !guard(from, to) {
                return Err(TransitionError::InvalidTransition { from, to });
            }
        }

        if let Some(effect) = self.on_exit.get(&from) {
            effect();
        }

        {
            let mut inner = self.inner.lock();
            let fi = from.index();
            inner.version_counters[fi] += 1;
            inner.transition_count[fi] += 1;
            inner.last_modified[fi] = Instant::now();
            inner.state = to;
        }

        if let Some(effect) = self.on_enter.get(&to) {
            effect();
        }

        {
            let mut inner = self.inner.lock();
            let ti = to.index();
            inner.last_modified[ti] = Instant::now();
        }

        tracing::debug!(?from, ?to, "session state transition");
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        let state = inner.state;
        let version = inner.version_counters[state.index()];
        Snapshot {
            state_id: state,
            integrity_digest: compute_digest(state, version),
            timestamp: Instant::now(),
            version_counter: version,
        }
    }

    /// Restore a previously-captured snapshot. Fails closed: a stale version
    /// counter or a digest mismatch leaves the machine untouched, except
    /// that a digest mismatch also drives the machine to `Error` and records
    /// the violation, matching the integrity-failure semantics of every
    /// other component.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<(), TransitionError> {
        let mut inner = self.inner.lock();
        if inner.locked[inner.state.index()] {
            return Err(TransitionError::Locked(inner.state));
        }

        let si = snapshot.state_id.index();
        if snapshot.version_counter < inner.version_counters[si] {
            inner.integrity_violation_count[si] += 1;
            return Err(TransitionError::StaleSnapshot);
        }

        let expected = compute_digest(snapshot.state_id, snapshot.version_counter);
        if expected != snapshot.integrity_digest {
            inner.integrity_violation_count[si] += 1;
            inner.state = SessionState::Error;
            return Err(TransitionError::IntegrityFailure);
        }

        inner.state = snapshot.state_id;
        inner.version_counters[si] = snapshot.version_counter;
        Ok(())
    }

    /// All per-state diagnostics, in declaration order — convenience for
    /// callers that want a full dump (e.g. the coordinator's diagnostic
    /// endpoint).
    pub fn all_diagnostics(&self) -> Vec<(SessionState, Diagnostics)> {
        SessionState::ALL
            .iter()
            .map(|&s| (s, self.diagnostics(s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn permitted_transitions_follow_the_graph() {
        let sm = StateMachine::new();
        assert_eq!(sm.current_state(), SessionState::Init);
        sm.transition(SessionState::Handshake).unwrap();
        sm.transition(SessionState::Auth).unwrap();
        sm.transition(SessionState::Ready).unwrap();
        sm.transition(SessionState::Executing).unwrap();
        sm.transition(SessionState::Ready).unwrap();
        sm.transition(SessionState::Shutdown).unwrap();
        assert_eq!(sm.current_state(), SessionState::Shutdown);
    }

    #[test]
    fn disallowed_transition_is_rejected() {
        let sm = StateMachine::new();
        let err = sm.transition(SessionState::Ready).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: SessionState::Init,
                to: SessionState::Ready
            }
        );
    }

    #[test]
    fn error_is_reachable_from_most_states_and_drains_to_shutdown() {
        let sm = StateMachine::new();
        sm.transition(SessionState::Handshake).unwrap();
        sm.transition(SessionState::Error).unwrap();
        sm.transition(SessionState::Shutdown).unwrap();
        assert_eq!(sm.current_state(), SessionState::Shutdown);
    }

    #[test]
    fn shutdown_is_terminal() {
        let sm = StateMachine::new();
        sm.transition(SessionState::Handshake).unwrap();
        sm.transition(SessionState::Error).unwrap();
        sm.transition(SessionState::Shutdown).unwrap();
        assert!(sm.transition(SessionState::Ready).is_err());
    }

    #[test]
    fn locked_state_rejects_transitions() {
        let sm = StateMachine::new();
        sm.lock_state(SessionState::Init);
        let err = sm.transition(SessionState::Handshake).unwrap_err();
        assert_eq!(err, TransitionError::Locked(SessionState::Init));
        sm.unlock_state(SessionState::Init);
        sm.transition(SessionState::Handshake).unwrap();
    }

    #[test]
    fn guard_predicate_can_veto_a_transition() {
        let mut sm = StateMachine::new();
        sm.set_guard(SessionState::Init, SessionState::Handshake, Box::new(|_, _| false));
        let err = sm.transition(SessionState::Handshake).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: SessionState::Init,
                to: SessionState::Handshake
            }
        );
    }

    #[test]
    fn on_exit_and_on_enter_effects_fire_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sm = StateMachine::new();

        let log_exit = log.clone();
        sm.set_on_exit(SessionState::Init, Box::new(move || log_exit.lock().push("exit-init")));
        let log_enter = log.clone();
        sm.set_on_enter(
            SessionState::Handshake,
            Box::new(move || log_enter.lock().push("enter-handshake")),
        );

        sm.transition(SessionState::Handshake).unwrap();
        assert_eq!(*log.lock(), vec!["exit-init", "enter-handshake"]);
    }

    #[test]
    fn reentrant_transition_from_an_effect_is_rejected() {
        // The machine is built behind an `Arc` first so the `on_enter`
        // effect can close over a weak handle to itself and attempt a
        // nested transition.
        let captured_err: Arc<Mutex<Option<TransitionError>>> = Arc::new(Mutex::new(None));
        let machine = Arc::new_cyclic(|weak: &std::sync::Weak<StateMachine>| {
            let weak = weak.clone();
            let captured_err = captured_err.clone();
            let mut sm = StateMachine::new();
            sm.set_on_enter(
                SessionState::Handshake,
                Box::new(move || {
                    if let Some(m) = weak.upgrade() {
                        let err = m.transition(SessionState::Auth).unwrap_err();
                        *captured_err.lock() = Some(err);
                    }
                }),
            );
            sm
        });

        machine.transition(SessionState::Handshake).unwrap();
        assert_eq!(*captured_err.lock(), Some(TransitionError::ReentrantTransition));
        // The outer transition itself still completed.
        assert_eq!(machine.current_state(), SessionState::Handshake);
    }

    #[test]
    fn snapshot_and_restore_roundtrip() {
        let sm = StateMachine::new();
        sm.transition(SessionState::Handshake).unwrap();
        let snap = sm.snapshot();
        sm.transition(SessionState::Auth).unwrap();
        assert_eq!(sm.current_state(), SessionState::Auth);

        sm.restore(&snap).unwrap();
        assert_eq!(sm.current_state(), SessionState::Handshake);
    }

    #[test]
    fn restore_rejects_stale_version_counter() {
        let sm = StateMachine::new();
        sm.transition(SessionState::Handshake).unwrap();
        // Taken while Handshake's version counter is still 0 (it hasn't
        // been exited yet).
        let stale = sm.snapshot();
        // Exiting Handshake bumps its version counter to 1, so `stale` now
        // refers to a version older than the machine's record for that
        // state.
        sm.transition(SessionState::Auth).unwrap();

        let err = sm.restore(&stale).unwrap_err();
        assert_eq!(err, TransitionError::StaleSnapshot);
        assert_eq!(sm.current_state(), SessionState::Auth);
    }

    #[test]
    fn restore_rejects_digest_mismatch_and_drives_to_error() {
        let sm = StateMachine::new();
        sm.transition(SessionState::Handshake).unwrap();
        let mut snap = sm.snapshot();
        snap.integrity_digest[0] ^= 0xFF;
        let err = sm.restore(&snap).unwrap_err();
        assert_eq!(err, TransitionError::IntegrityFailure);
        assert_eq!(sm.current_state(), SessionState::Error);
        let diag = sm.diagnostics(SessionState::Handshake);
        assert_eq!(diag.integrity_violation_count, 1);
    }

    #[test]
    fn diagnostics_track_transition_counts() {
        let sm = StateMachine::new();
        sm.transition(SessionState::Handshake).unwrap();
        sm.transition(SessionState::Auth).unwrap();
        let diag = sm.diagnostics(SessionState::Init);
        assert_eq!(diag.transition_count, 1);
        let diag = sm.diagnostics(SessionState::Handshake);
        assert_eq!(diag.transition_count, 1);
    }

    #[test]
    fn concurrent_readers_observe_consistent_state() {
        let sm = Arc::new(StateMachine::new());
        sm.transition(SessionState::Handshake).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sm = sm.clone();
            let hits = hits.clone();
            handles.push(std::thread::spawn(move || {
                if sm.current_state() == SessionState::Handshake {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 8);
    }
}
