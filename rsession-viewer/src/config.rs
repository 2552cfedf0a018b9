//! Viewer client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rsession_core::config::{HeartbeatConfig, SessionConfig};
use rsession_core::network::DEFAULT_PORT;
use rsession_core::{Capabilities, ConnectionInfo, SessionError};

use crate::connection::ReconnectPolicy;

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Input forwarding settings.
    pub input: InputConfig,
    /// Session timing.
    pub session: SessionTuning,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host address, `host[:port]`.
    pub host_address: String,
    /// Per-attempt connection timeout in milliseconds.
    pub timeout_ms: u64,
    /// Delay between connection attempts in milliseconds.
    pub retry_interval_ms: u64,
    /// Give up after this many attempts; 0 retries until stopped.
    pub max_attempts: u32,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Viewer surface width; controller coordinates are relative to it.
    pub width: u32,
    /// Viewer surface height.
    pub height: u32,
    /// Write the last frame here as PNG on exit. Empty disables it.
    pub snapshot_path: String,
    /// Accept JPEG frames.
    pub jpeg: bool,
}

/// Input forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub pointer: bool,
    pub keyboard: bool,
    pub touch: bool,
    /// Show cursor and haptic feedback from the host.
    pub feedback: bool,
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    pub handshake_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub grace_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            timeout_ms: 5000,
            retry_interval_ms: 5000,
            max_attempts: 0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            snapshot_path: String::new(),
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

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn address(&self) -> Result<ConnectionInfo, SessionError> {
        ConnectionInfo::parse(&self.network.host_address)
    }

    pub fn surface(&self) -> (u32, u32) {
        (self.display.width.max(1), self.display.height.max(1))
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.display.snapshot_path.is_empty()).then(|| PathBuf::from(&self.display.snapshot_path))
    }

    /// Flags this viewer advertises.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::ZSTD;
        caps.set(Capabilities::JPEG, self.display.jpeg);
        caps.set(Capabilities::POINTER, self.input.pointer);
        caps.set(Capabilities::KEYBOARD, self.input.keyboard);
        caps.set(Capabilities::TOUCH, self.input.touch);
        caps.set(Capabilities::FEEDBACK, self.input.feedback);
        caps
    }

    pub fn to_session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            connect_timeout: Duration::from_millis(self.network.timeout_ms.clamp(100, 60_000)),
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms.clamp(100, 60_000)),
            capabilities: self.capabilities(),
            heartbeat: HeartbeatConfig {
                idle_interval: Duration::from_millis(s.keepalive_interval_ms.clamp(10, 60_000)),
                grace: Duration::from_millis(s.grace_ms.min(600_000)),
                ..HeartbeatConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let n = &self.network;
        ReconnectPolicy {
            retry_interval: Duration::from_millis(n.retry_interval_ms.clamp(10, 600_000)),
            attempt_timeout: Duration::from_millis(n.timeout_ms.clamp(100, 60_000)),
            max_attempts: (n.max_attempts > 0).then_some(n.max_attempts),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ViewerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("host_address"));
        assert!(text.contains("retry_interval_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ViewerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ViewerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.display.width, 1280);
        assert_eq!(parsed.network.host_address, "127.0.0.1:2049");
        assert_eq!(parsed.address().unwrap().port(), 2049);
    }

    #[test]
    fn reconnect_defaults_match_five_second_cadence() {
        let policy = ViewerConfig::default().reconnect_policy();
        assert_eq!(policy.retry_interval, Duration::from_secs(5));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn conversions_clamp() {
        let mut cfg = ViewerConfig::default();
        cfg.network.timeout_ms = 0;
        cfg.display.width = 0;
        cfg.display.snapshot_path = "last.png".into();
        assert_eq!(cfg.to_session_config().connect_timeout, Duration::from_millis(100));
        assert_eq!(cfg.surface(), (1, 720));
        assert_eq!(cfg.snapshot_path(), Some(PathBuf::from("last.png")));
    }
}
