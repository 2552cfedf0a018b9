//! Session lifecycle state machine.
//!
//! Models the lifecycle of one remote pairing with validated
//! transitions that return `Result` instead of panicking.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{CloseReason, SessionError};

// ── SessionState ─────────────────────────────────────────────────

/// ```text
///  Idle ──► Connecting ──► Handshaking ──► Active ◄──► Degraded
///               │               │             │            │
///               ▼               ▼             ▼            ▼
///             Closed ◄──────────┘          Closing ◄───────┘
///                                             │
///                                             ▼
///                                           Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Handshaking,
    Active,
    Degraded,
    Closing,
    Closed,
}

impl SessionState {
    /// Channel operations only take effect in these states.
    pub fn is_operational(self) -> bool {
        matches!(self, Self::Active | Self::Degraded)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── SessionStateMachine ──────────────────────────────────────────

/// Sole owner of a session's [`SessionState`].
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    since: Instant,
    reason: Option<CloseReason>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            since: Instant::now(),
            reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time spent in the current state.
    pub fn elapsed(&self) -> Duration {
        self.since.elapsed()
    }

    /// Why the session is closing or closed.
    pub fn reason(&self) -> Option<&CloseReason> {
        self.reason.as_ref()
    }

    fn enter(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "session state");
        self.state = next;
        self.since = Instant::now();
    }

    fn reject(&self, event: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state.as_str(),
            event,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {
                self.enter(SessionState::Connecting);
                Ok(())
            }
            _ => Err(self.reject("connect")),
        }
    }

    /// Protocol version agreed. Valid from: `Connecting`.
    pub fn versions_agreed(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting => {
                self.enter(SessionState::Handshaking);
                Ok(())
            }
            _ => Err(self.reject("agree version")),
        }
    }

    /// Capabilities agreed. Valid from: `Handshaking`.
    pub fn capabilities_agreed(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Handshaking => {
                self.enter(SessionState::Active);
                Ok(())
            }
            _ => Err(self.reject("agree capabilities")),
        }
    }

    /// Establishment failed. Valid from: `Connecting`, `Handshaking`.
    pub fn fail(&mut self, reason: CloseReason) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting | SessionState::Handshaking => {
                self.reason = Some(reason);
                self.enter(SessionState::Closed);
                Ok(())
            }
            _ => Err(self.reject("fail establishment")),
        }
    }

    /// Valid from: `Active`.
    pub fn degrade(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => {
                self.enter(SessionState::Degraded);
                Ok(())
            }
            _ => Err(self.reject("degrade")),
        }
    }

    /// Valid from: `Degraded`.
    pub fn recover(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Degraded => {
                self.enter(SessionState::Active);
                Ok(())
            }
            _ => Err(self.reject("recover")),
        }
    }

    /// Valid from: `Active`, `Degraded`.
    pub fn begin_close(&mut self, reason: CloseReason) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active | SessionState::Degraded => {
                self.reason = Some(reason);
                self.enter(SessionState::Closing);
                Ok(())
            }
            _ => Err(self.reject("close")),
        }
    }

    /// Resources released. Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closing => {
                self.enter(SessionState::Closed);
                Ok(())
            }
            _ => Err(self.reject("finish close")),
        }
    }
}
