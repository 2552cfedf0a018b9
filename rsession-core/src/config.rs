//! Library-level configuration.
//!
//! Binaries load their own TOML files and convert into these structs.

use std::time::Duration;

use crate::codec::DEFAULT_MAX_PAYLOAD;
use crate::flags::Capabilities;
use crate::network::VersionPolicy;

// ── HeartbeatConfig ──────────────────────────────────────────────

/// Keep-alive and link-loss timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Send a keep-alive after this long without outbound traffic.
    pub idle_interval: Duration,
    /// Inbound silence of `idle_interval * degrade_factor` degrades the session.
    pub degrade_factor: u32,
    /// Extra silence after degrading before the link is declared lost.
    pub grace: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(2),
            degrade_factor: 3,
            grace: Duration::from_secs(5),
        }
    }
}

impl HeartbeatConfig {
    pub fn degrade_after(&self) -> Duration {
        self.idle_interval * self.degrade_factor.max(1)
    }

    pub fn lost_after(&self) -> Duration {
        self.degrade_after() + self.grace
    }

    /// Monitor resolution.
    pub fn tick(&self) -> Duration {
        (self.idle_interval / 4).max(Duration::from_millis(5))
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Everything a [`Session`](crate::Session) needs beyond its channels.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transport establishment bound (viewer side).
    pub connect_timeout: Duration,
    /// Bound on each handshake round trip.
    pub handshake_timeout: Duration,
    /// Versions this peer is willing to speak.
    pub version: VersionPolicy,
    /// Capability flags advertised in the handshake.
    pub capabilities: Capabilities,
    /// Largest payload accepted or sent on any channel.
    pub max_payload: usize,
    pub heartbeat: HeartbeatConfig,
    /// Bound on queued data messages (submission queue and send queue).
    pub send_queue_capacity: usize,
    /// Bound on undelivered messages per reliable receive channel.
    pub recv_queue_capacity: usize,
    /// Time allowed to flush a goodbye once closing starts.
    pub close_flush_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            version: VersionPolicy::default(),
            capabilities: Capabilities::default(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            heartbeat: HeartbeatConfig::default(),
            send_queue_capacity: 64,
            recv_queue_capacity: 256,
            close_flush_timeout: Duration::from_millis(250),
        }
    }
}
