//! Session lifecycle state machine.
//!
//! ```text
//! Connecting ──open──> Connected ──close──> Disconnected
//!     │                    │
//!     └──────error─────────┴──────────────> Error
//! ```
//!
//! `Error` and `Disconnected` are terminal; a new call needs a new session.
//! Only the session writes the state. Everyone else holds a `StateWatch`.

use crate::error::InvalidTransition;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Error = 2,
    Disconnected = 3,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Error | SessionState::Disconnected)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Error)
                | (Connected, Disconnected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
            SessionState::Disconnected => "disconnected",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Error,
            _ => SessionState::Disconnected,
        }
    }
}

/// Read-only view of the session state, safe to poll from any thread.
#[derive(Clone)]
pub struct StateWatch {
    cell: Arc<AtomicU8>,
}

impl StateWatch {
    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.cell.load(Ordering::Acquire))
    }
}

/// Owner of the session state.
pub struct StateMachine {
    cell: Arc<AtomicU8>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(AtomicU8::new(SessionState::Connecting as u8)),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.cell.load(Ordering::Acquire))
    }

    pub fn watch(&self) -> StateWatch {
        StateWatch {
            cell: self.cell.clone(),
        }
    }

    /// Moves to `next`, returning the previous state.
    pub fn transition(&self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.cell.store(next as u8, Ordering::Release);
        Ok(from)
    }
}
