//! Domain-specific error types for the remote session protocol.
//!
//! Fallible operations return `Result<T, SessionError>`. Errors that end
//! a running session are not returned from arbitrary call sites; they
//! are reported once through the session state machine as a
//! [`CloseReason`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The canonical error type for the remote session protocol.
#[derive(Debug, Error)]
pub enum SessionError {
    // ── Establishment Errors ─────────────────────────────────────
    /// The transport could not be established (refused, unreachable
    /// or timed out).
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// The peer did not answer a handshake step within the window.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Neither side supports a common protocol version.
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: String, remote: String },

    // ── Multiplexer Errors ───────────────────────────────────────
    /// A frame arrived for a channel that was never registered.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// A received frame exceeded the configured payload limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame or message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // ── Pipeline Errors ──────────────────────────────────────────
    /// A raw capture could not be encoded (empty or malformed input).
    #[error("encode error: {0}")]
    Encode(String),

    /// A received payload could not be decoded into an image.
    #[error("decode error: {0}")]
    Decode(String),

    /// The injection target rejected an input event.
    #[error("injection failed: {0}")]
    Inject(String),

    // ── State Errors ─────────────────────────────────────────────
    /// A lifecycle transition was requested from the wrong state.
    #[error("invalid transition: cannot {event} while {from}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal queue was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a structured payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Errors that prevent a session from ever reaching `Active`.
    pub fn is_establishment_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Connect { .. }
                | SessionError::HandshakeTimeout(_)
                | SessionError::VersionMismatch { .. }
        )
    }
}

// ── CloseReason ───────────────────────────────────────────────────

/// Why a session ended.
///
/// Delivered exactly once, through [`Session::closed`], when the
/// state machine reaches `Closed`.
///
/// [`Session::closed`]: crate::session::Session::closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called locally.
    LocalClose,
    /// The peer said goodbye or closed its end of the stream.
    PeerClosed,
    /// No inbound traffic for longer than the degrade window plus grace.
    LinkLost,
    /// The transport failed mid-session.
    Transport(String),
    /// The peer sent something that cannot be resynchronised.
    Protocol(String),
    /// A component reported an unrecoverable failure.
    Fatal(String),
}

impl CloseReason {
    /// Stable numeric code carried in `Goodbye` messages.
    pub fn code(&self) -> u8 {
        match self {
            CloseReason::LocalClose => 0,
            CloseReason::PeerClosed => 1,
            CloseReason::LinkLost => 2,
            CloseReason::Transport(_) => 3,
            CloseReason::Protocol(_) => 4,
            CloseReason::Fatal(_) => 5,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LocalClose => write!(f, "closed locally"),
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::LinkLost => write!(f, "link lost"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
            CloseReason::Protocol(e) => write!(f, "protocol error: {e}"),
            CloseReason::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for SessionError {
    fn from(s: String) -> Self {
        SessionError::Other(s)
    }
}

impl From<&str> for SessionError {
    fn from(s: &str) -> Self {
        SessionError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SessionError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SessionError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for SessionError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SessionError::Encoding(e.to_string())
    }
}
