//! Connection lifecycle state machine
//!
//! Every network-facing link (video stream, PTZ control, telemetry bus) owns
//! one of these. State transitions are validated so a link can never claim an
//! impossible lifecycle, and each transition records when it happened so
//! consumers can judge staleness.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Lifecycle phase of a device link connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Link object exists but no connection attempt has been made
    Created,

    /// Connection attempt in progress
    Opening,

    /// Connected and exchanging data
    Opened,

    /// Orderly shutdown in progress
    Closing,

    /// Orderly shutdown finished; a new connect attempt may follow
    Closed,

    /// Unrecoverable protocol or transport error; a new connect attempt may follow
    Faulted,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionPhase::Created => "Created",
            ConnectionPhase::Opening => "Opening",
            ConnectionPhase::Opened => "Opened",
            ConnectionPhase::Closing => "Closing",
            ConnectionPhase::Closed => "Closed",
            ConnectionPhase::Faulted => "Faulted",
        };
        write!(f, "{}", name)
    }
}

/// Rejected state transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition {event}() while {from}")]
pub struct InvalidTransition {
    /// Phase the state was in when the event arrived
    pub from: ConnectionPhase,
    /// Name of the rejected transition event
    pub event: &'static str,
}

/// Connection state machine with transition-timestamp tracking
///
/// Transitions:
/// `Created → Opening → Opened → Closing → Closed`, with `Faulted` reachable
/// from `Opening` (connect failure) and `Opened` (link loss). `Closed` and
/// `Faulted` are terminal for one connection attempt; `begin_connect` from
/// either starts a reconnect.
///
/// `entered_at` is updated on every transition and nowhere else. Retry policy
/// lives in the lifecycle layer, never here.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    entered_at: Instant,
}

impl ConnectionState {
    /// Create a new state in `Created`
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Created,
            entered_at: Instant::now(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Time spent in the current phase
    pub fn elapsed_since_transition(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// `Created|Closed|Faulted → Opening`
    pub fn begin_connect(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ConnectionPhase::Created | ConnectionPhase::Closed | ConnectionPhase::Faulted => {
                Ok(self.enter(ConnectionPhase::Opening))
            }
            from => Err(InvalidTransition {
                from,
                event: "begin_connect",
            }),
        }
    }

    /// `Opening → Opened`
    pub fn connect_succeeded(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ConnectionPhase::Opening => Ok(self.enter(ConnectionPhase::Opened)),
            from => Err(InvalidTransition {
                from,
                event: "connect_succeeded",
            }),
        }
    }

    /// `Opening → Faulted`
    pub fn connect_failed(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ConnectionPhase::Opening => Ok(self.enter(ConnectionPhase::Faulted)),
            from => Err(InvalidTransition {
                from,
                event: "connect_failed",
            }),
        }
    }

    /// `Opened → Faulted`
    pub fn link_lost(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ConnectionPhase::Opened => Ok(self.enter(ConnectionPhase::Faulted)),
            from => Err(InvalidTransition {
                from,
                event: "link_lost",
            }),
        }
    }

    /// `Opened|Opening → Closing`
    pub fn begin_close(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ConnectionPhase::Opened | ConnectionPhase::Opening => {
                Ok(self.enter(ConnectionPhase::Closing))
            }
            from => Err(InvalidTransition {
                from,
                event: "begin_close",
            }),
        }
    }

    /// `Closing → Closed`
    pub fn close_completed(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ConnectionPhase::Closing => Ok(self.enter(ConnectionPhase::Closed)),
            from => Err(InvalidTransition {
                from,
                event: "close_completed",
            }),
        }
    }

    fn enter(&mut self, next: ConnectionPhase) {
        self.phase = next;
        self.entered_at = Instant::now();
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable, mutex-guarded handle to a [`ConnectionState`]
///
/// The owning link task drives transitions; status readers on the consumer
/// side poll `phase()` and `elapsed_since_transition()`. A single mutex wraps
/// the whole read-modify-write so a reader can never observe a transition
/// mid-write.
#[derive(Debug, Clone)]
pub struct SharedConnectionState {
    inner: Arc<Mutex<ConnectionState>>,
}

impl SharedConnectionState {
    /// Create a new shared state in `Created`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConnectionState::new())),
        }
    }

    /// Current phase
    pub fn phase(&self) -> ConnectionPhase {
        self.lock().phase()
    }

    /// Time spent in the current phase
    pub fn elapsed_since_transition(&self) -> Duration {
        self.lock().elapsed_since_transition()
    }

    /// See [`ConnectionState::begin_connect`]
    pub fn begin_connect(&self) -> Result<(), InvalidTransition> {
        self.lock().begin_connect()
    }

    /// See [`ConnectionState::connect_succeeded`]
    pub fn connect_succeeded(&self) -> Result<(), InvalidTransition> {
        self.lock().connect_succeeded()
    }

    /// See [`ConnectionState::connect_failed`]
    pub fn connect_failed(&self) -> Result<(), InvalidTransition> {
        self.lock().connect_failed()
    }

    /// See [`ConnectionState::link_lost`]
    pub fn link_lost(&self) -> Result<(), InvalidTransition> {
        self.lock().link_lost()
    }

    /// See [`ConnectionState::begin_close`]
    pub fn begin_close(&self) -> Result<(), InvalidTransition> {
        self.lock().begin_close()
    }

    /// See [`ConnectionState::close_completed`]
    pub fn close_completed(&self) -> Result<(), InvalidTransition> {
        self.lock().close_completed()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        // A poisoned state lock means a panic mid-transition; the state value
        // itself is always a valid phase, so keep serving it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_full_lifecycle() {
        let mut state = ConnectionState::new();
        assert_eq!(state.phase(), ConnectionPhase::Created);

        state.begin_connect().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Opening);

        state.connect_succeeded().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Opened);

        state.begin_close().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Closing);

        state.close_completed().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn test_connect_failure_faults() {
        let mut state = ConnectionState::new();
        state.begin_connect().unwrap();
        state.connect_failed().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Faulted);

        // Failure instant resets the transition timer
        assert!(state.elapsed_since_transition() < Duration::from_millis(50));
    }

    #[test]
    fn test_reconnect_from_terminal_phases() {
        let mut state = ConnectionState::new();
        state.begin_connect().unwrap();
        state.connect_failed().unwrap();

        // Faulted → Opening is a reconnect
        state.begin_connect().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Opening);

        state.begin_close().unwrap();
        state.close_completed().unwrap();

        // Closed → Opening as well
        state.begin_connect().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Opening);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut state = ConnectionState::new();

        // Closed → Opened directly is impossible
        let err = state.connect_succeeded().unwrap_err();
        assert_eq!(err.from, ConnectionPhase::Created);
        assert_eq!(err.event, "connect_succeeded");

        assert!(state.link_lost().is_err());
        assert!(state.close_completed().is_err());
        assert_eq!(state.phase(), ConnectionPhase::Created);
    }

    #[test]
    fn test_rejected_transition_keeps_timer() {
        let mut state = ConnectionState::new();
        state.begin_connect().unwrap();

        thread::sleep(Duration::from_millis(20));
        let before = state.elapsed_since_transition();

        // A rejected event must not touch entered_at
        assert!(state.close_completed().is_err());
        assert!(state.elapsed_since_transition() >= before);
    }

    #[test]
    fn test_shared_state_across_threads() {
        let state = SharedConnectionState::new();
        state.begin_connect().unwrap();

        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                state.connect_succeeded().unwrap();
            })
        };
        writer.join().unwrap();

        assert_eq!(state.phase(), ConnectionPhase::Opened);
    }
}
