//! # rsession-core
//!
//! Core library for remote sessions: a host streams its framebuffer to
//! a viewer and injects the input the viewer relays back.
//!
//! This crate contains:
//! - **Codec**: `MuxCodec`, the length-prefixed channel frame codec
//! - **Network**: `Connection` for the TCP transport, handshake and heartbeat
//! - **Mux**: channel registry, prioritised outbound queue, demultiplexer
//! - **State**: `SessionStateMachine` and the driver task that owns it
//! - **Session**: `Session`, wiring all of the above into one handle
//! - **Stream**: frame encoders/decoder, ack-paced `FrameScheduler`,
//!   host `FrameStreamer` and viewer `FrameConsumer`
//! - **Input**: `InputCapture`/`InputSender`, `InputPlayback`, feedback
//! - **Error**: `SessionError` and `CloseReason`, `thiserror`-based

pub mod codec;
pub mod config;
pub mod error;
pub mod flags;
pub mod input;
pub mod message;
pub mod mux;
pub mod network;
pub mod session;
pub mod state;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{DEFAULT_MAX_PAYLOAD, MuxCodec};
pub use config::{HeartbeatConfig, SessionConfig};
pub use error::{CloseReason, SessionError};
pub use flags::Capabilities;
pub use message::{
    CONTROL_CHANNEL, ControlMessage, DeliveryMode, FEEDBACK_CHANNEL, FRAMEBUFFER_CHANNEL,
    INPUT_CHANNEL, Message, Priority,
};
pub use mux::{
    ChannelReceiver, ChannelRegistry, ChannelRole, ChannelSender, ChannelSpec, ControlSender,
    SendOutcome,
};
pub use network::{Connection, ConnectionInfo, DEFAULT_PORT, Role, SessionId, VersionPolicy};
pub use session::Session;
pub use state::{SessionSignal, SessionState, SessionStateMachine};

// ── Pipeline re-exports ──────────────────────────────────────────
pub use input::{
    FeedbackEvent, InputCapture, InputEvent, InputInjector, InputPlayback, InputReplayConfig,
    InputSender,
};
pub use stream::{
    DecodedFrame, DisplaySink, FrameConsumer, FrameDecoder, FrameEncoder, FrameScheduler,
    FrameSource, FrameStreamer, RawFrame, SchedulerConfig, StreamerConfig,
};
