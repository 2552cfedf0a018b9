//! Multiplexed message types and control-channel vocabulary.
//!
//! A [`Message`] is the unit the multiplexer frames onto the wire. The
//! reserved control channel carries [`ControlMessage`]s; every other
//! channel carries opaque application payloads.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::network::handshake::Hello;

// ── Channel names ────────────────────────────────────────────────

/// Reserved channel for handshake, keep-alive, acks and teardown.
pub const CONTROL_CHANNEL: &str = "rs.control";
/// Compressed frames, host → viewer.
pub const FRAMEBUFFER_CHANNEL: &str = "rs.framebuffer";
/// Input events, viewer → host.
pub const INPUT_CHANNEL: &str = "rs.input";
/// Cursor / haptic feedback, host → viewer.
pub const FEEDBACK_CHANNEL: &str = "rs.feedback";

/// Longest channel name the wire format accepts.
pub const MAX_CHANNEL_NAME: usize = 255;

// ── DeliveryMode / Priority ──────────────────────────────────────

/// Per-channel delivery semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Every message is delivered, in order, with gap-free sequences.
    ReliableOrdered,
    /// An unsent message is replaced by a newer one for the same
    /// channel. Sequences may show gaps but never go backwards.
    BestEffortLatest,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::ReliableOrdered => write!(f, "reliable-ordered"),
            DeliveryMode::BestEffortLatest => write!(f, "best-effort-latest"),
        }
    }
}

/// Send-queue priority class. Control preempts data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Control,
    Data,
}

// ── Message ──────────────────────────────────────────────────────

/// One multiplexed message. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    channel: Arc<str>,
    sequence: u64,
    payload: Bytes,
    timestamp: Instant,
}

impl Message {
    pub fn new(channel: Arc<str>, sequence: u64, payload: Bytes) -> Self {
        Self {
            channel,
            sequence,
            payload,
            timestamp: Instant::now(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Local construction (send side) or decode (receive side) time.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("sequence", &self.sequence)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

// ── ControlMessage ───────────────────────────────────────────────

/// Everything that travels on [`CONTROL_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Handshake step 1: version exchange.
    Hello(Hello),
    /// Handshake step 2: capability flags (wire bits).
    Capabilities { bits: u32 },
    /// Idle ping. Carries no data; its arrival is the signal.
    KeepAlive,
    /// The viewer finished displaying `frame_index`.
    FrameAck { frame_index: u64 },
    /// Propose a new capability set mid-session.
    Renegotiate { bits: u32 },
    /// Answer to `Renegotiate` carrying the agreed intersection.
    RenegotiateAck { bits: u32 },
    /// Orderly teardown with a [`CloseReason`](crate::CloseReason) code.
    Goodbye { code: u8, detail: String },
}

impl ControlMessage {
    pub fn to_bytes(&self) -> Result<Bytes, SessionError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Hello(_) => "hello",
            ControlMessage::Capabilities { .. } => "capabilities",
            ControlMessage::KeepAlive => "keep-alive",
            ControlMessage::FrameAck { .. } => "frame-ack",
            ControlMessage::Renegotiate { .. } => "renegotiate",
            ControlMessage::RenegotiateAck { .. } => "renegotiate-ack",
            ControlMessage::Goodbye { .. } => "goodbye",
        }
    }
}

/// Validate a channel name against the wire limits.
pub fn validate_channel_name(name: &str) -> Result<(), SessionError> {
    if name.is_empty() {
        return Err(SessionError::ProtocolViolation("empty channel name".into()));
    }
    if name.len() > MAX_CHANNEL_NAME {
        return Err(SessionError::ProtocolViolation(format!(
            "channel name is {} bytes (max {MAX_CHANNEL_NAME})",
            name.len()
        )));
    }
    Ok(())
}
