//! Configuration for the session host.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rsession_core::config::{HeartbeatConfig, SessionConfig};
use rsession_core::input::{InputReplayConfig, ReplayTiming};
use rsession_core::network::DEFAULT_PORT;
use rsession_core::stream::{SchedulerConfig, StreamerConfig};
use rsession_core::Capabilities;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Frame streaming settings.
    pub stream: StreamConfig,
    /// Input injection settings.
    pub input: InputConfig,
    /// Session timing.
    pub session: SessionTuning,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind.
    pub bind_address: String,
    /// TCP port viewers connect to.
    pub port: u16,
}

/// Frame streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capture ceiling in frames per second.
    pub framerate: u32,
    /// Starting image quality, 1-100.
    pub quality: u8,
    /// Width of the test-pattern source.
    pub width: u32,
    /// Height of the test-pattern source.
    pub height: u32,
    /// A frame without an ack for this long is abandoned.
    pub ack_timeout_ms: u64,
    /// Advertise JPEG (zstd is always advertised).
    pub jpeg: bool,
}

/// Input injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Accept pointer events.
    pub pointer: bool,
    /// Accept keyboard events.
    pub keyboard: bool,
    /// Accept touch events.
    pub touch: bool,
    /// Swallow injected input instead of applying it.
    pub consume_input: bool,
    /// Replay with the viewer's original event spacing.
    pub preserve_timing: bool,
    /// Re-anchor replay once it trails by more than this.
    pub max_lag_ms: u64,
    /// Target window rectangle: left, top, width, height.
    pub window: [i64; 4],
    /// Send cursor feedback to the viewer.
    pub feedback: bool,
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Bound on each handshake round trip.
    pub handshake_timeout_ms: u64,
    /// Keep-alive cadence when idle.
    pub keepalive_interval_ms: u64,
    /// Extra silence tolerated after degrading, before the link is lost.
    pub grace_ms: u64,
    /// Largest message payload in MiB.
    pub max_payload_mib: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            quality: 80,
            width: 1280,
            height: 720,
            ack_timeout_ms: 1000,
            jpeg: true,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            pointer: true,
            keyboard: true,
            touch: true,
            consume_input: false,
            preserve_timing: true,
            max_lag_ms: 100,
            window: [0, 0, 1280, 720],
            feedback: true,
        }
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5000,
            keepalive_interval_ms: 2000,
            grace_ms: 5000,
            max_payload_mib: 32,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }

    /// Flags this host advertises.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::ZSTD;
        caps.set(Capabilities::JPEG, self.stream.jpeg);
        caps.set(Capabilities::POINTER, self.input.pointer);
        caps.set(Capabilities::KEYBOARD, self.input.keyboard);
        caps.set(Capabilities::TOUCH, self.input.touch);
        caps.set(Capabilities::FEEDBACK, self.input.feedback);
        caps
    }

    pub fn to_session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms.clamp(100, 60_000)),
            capabilities: self.capabilities(),
            max_payload: s.max_payload_mib.clamp(1, 256) * 1024 * 1024,
            heartbeat: HeartbeatConfig {
                idle_interval: Duration::from_millis(s.keepalive_interval_ms.clamp(10, 60_000)),
                grace: Duration::from_millis(s.grace_ms.min(600_000)),
                ..HeartbeatConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    pub fn to_streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            scheduler: SchedulerConfig {
                fps: self.stream.framerate.clamp(1, 120),
                initial_quality: self.stream.quality.clamp(1, 100),
                ack_timeout: Duration::from_millis(self.stream.ack_timeout_ms.clamp(50, 30_000)),
                ..SchedulerConfig::default()
            },
            ..StreamerConfig::default()
        }
    }

    pub fn to_replay_config(&self) -> InputReplayConfig {
        let timing = if self.input.preserve_timing {
            ReplayTiming::Preserve {
                max_lag: Duration::from_millis(self.input.max_lag_ms),
            }
        } else {
            ReplayTiming::Immediate
        };
        InputReplayConfig { timing }
    }

    /// Window rectangle with the size clamped to at least 1×1.
    pub fn window_rect(&self) -> (i32, i32, u32, u32) {
        let [left, top, width, height] = self.input.window;
        let clamp_pos = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let clamp_len = |v: i64| v.clamp(1, u32::MAX as i64) as u32;
        (clamp_pos(left), clamp_pos(top), clamp_len(width), clamp_len(height))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("framerate"));
        assert!(text.contains("consume_input"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 2049);
        assert_eq!(parsed.stream.framerate, 30);
        assert_eq!(parsed.stream.quality, 80);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: HostConfig = toml::from_str("[stream]\nframerate = 15\n").unwrap();
        assert_eq!(parsed.stream.framerate, 15);
        assert_eq!(parsed.stream.quality, 80);
        assert_eq!(parsed.network.port, 2049);
    }

    #[test]
    fn conversions_clamp() {
        let mut cfg = HostConfig::default();
        cfg.stream.framerate = 0;
        cfg.stream.quality = 0;
        cfg.session.keepalive_interval_ms = 0;
        cfg.input.window = [0, 0, -5, 0];

        let streamer = cfg.to_streamer_config();
        assert_eq!(streamer.scheduler.fps, 1);
        assert_eq!(streamer.scheduler.initial_quality, 1);
        assert_eq!(
            cfg.to_session_config().heartbeat.idle_interval,
            Duration::from_millis(10)
        );
        assert_eq!(cfg.window_rect(), (0, 0, 1, 1));
    }

    #[test]
    fn capabilities_follow_switches() {
        let mut cfg = HostConfig::default();
        cfg.stream.jpeg = false;
        cfg.input.touch = false;
        let caps = cfg.capabilities();
        assert!(caps.contains(Capabilities::ZSTD | Capabilities::POINTER));
        assert!(!caps.intersects(Capabilities::JPEG | Capabilities::TOUCH));
    }
}
