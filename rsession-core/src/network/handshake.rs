//! Handshake payloads and version negotiation.
//!
//! The handshake runs on the control channel in two steps:
//!
//! ```text
//! Viewer ──[Hello]─────────────► Host      version exchange
//! Viewer ◄─[Hello]────────────── Host      → Handshaking
//! Viewer ──[Capabilities]──────► Host      capability exchange
//! Viewer ◄─[Capabilities]─────── Host      → Active
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Leading bytes of every hello.
pub const PROTOCOL_MAGIC: [u8; 4] = *b"RSES";

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: u16 = 2;

// ── Role ─────────────────────────────────────────────────────────

/// Which end of the pairing this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Renders, captures and streams frames; injects input.
    Host,
    /// Displays frames; captures and forwards input.
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

// ── SessionId ────────────────────────────────────────────────────

/// Identity shared by both ends of one pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Both peers hash the two nonces in host-then-viewer order, so they
/// agree on the id without another round trip.
pub fn derive_session_id(host_nonce: u64, viewer_nonce: u64) -> SessionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&host_nonce.to_le_bytes());
    hasher.update(&viewer_nonce.to_le_bytes());
    let digest = hasher.finalize();
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest.as_bytes()[..8]);
    SessionId(u64::from_le_bytes(id))
}

/// Produce a nonce that differs across processes, peers and calls.
pub fn generate_nonce(seed: &[u8]) -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(seed);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(out)
}

// ── VersionPolicy ────────────────────────────────────────────────

/// The versions a peer is willing to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPolicy {
    /// Version this peer speaks natively.
    pub version: u16,
    /// Oldest version this peer can fall back to.
    pub min_compatible: u16,
    /// Explicit opt-in to speaking an older version.
    pub backward_compatible: bool,
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            min_compatible: PROTOCOL_VERSION,
            backward_compatible: false,
        }
    }
}

impl fmt::Display for VersionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)?;
        if self.backward_compatible {
            write!(f, " (back to v{})", self.min_compatible)?;
        }
        Ok(())
    }
}

// ── Hello ────────────────────────────────────────────────────────

/// Handshake step 1 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub magic: [u8; 4],
    pub version: u16,
    pub min_compatible: u16,
    pub backward_compatible: bool,
    pub nonce: u64,
    /// First four bytes of blake3 over the fields above.
    pub checksum: u32,
}

impl Hello {
    pub fn new(policy: &VersionPolicy, nonce: u64) -> Self {
        let mut hello = Self {
            magic: PROTOCOL_MAGIC,
            version: policy.version,
            min_compatible: policy.min_compatible.min(policy.version),
            backward_compatible: policy.backward_compatible,
            nonce,
            checksum: 0,
        };
        hello.checksum = hello.digest();
        hello
    }

    fn digest(&self) -> u32 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.min_compatible.to_le_bytes());
        hasher.update(&[self.backward_compatible as u8]);
        hasher.update(&self.nonce.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 4];
        out.copy_from_slice(&digest.as_bytes()[..4]);
        u32::from_le_bytes(out)
    }

    /// Reject peers that don't speak this protocol at all.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.magic != PROTOCOL_MAGIC {
            return Err(SessionError::ProtocolViolation("bad hello magic".into()));
        }
        if self.checksum != self.digest() {
            return Err(SessionError::ProtocolViolation("hello checksum mismatch".into()));
        }
        Ok(())
    }

    pub fn policy(&self) -> VersionPolicy {
        VersionPolicy {
            version: self.version,
            min_compatible: self.min_compatible,
            backward_compatible: self.backward_compatible,
        }
    }
}

/// Pick the version both peers will speak.
///
/// Equal versions always agree. Different versions agree on the lower
/// one only when both peers opted into backward compatibility and the
/// newer peer can still speak the older version.
pub fn negotiate_version(
    local: &VersionPolicy,
    remote: &VersionPolicy,
) -> Result<u16, SessionError> {
    if local.version == remote.version {
        return Ok(local.version);
    }

    let (newer, older) = if local.version > remote.version {
        (local, remote)
    } else {
        (remote, local)
    };

    let both_compatible = local.backward_compatible && remote.backward_compatible;
    if both_compatible && newer.min_compatible <= older.version {
        return Ok(older.version);
    }

    Err(SessionError::VersionMismatch {
        local: local.to_string(),
        remote: remote.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(version: u16, min_compatible: u16, backward_compatible: bool) -> VersionPolicy {
        VersionPolicy {
            version,
            min_compatible,
            backward_compatible,
        }
    }

    #[test]
    fn same_version_always_agrees() {
        assert_eq!(negotiate_version(&policy(3, 3, false), &policy(3, 3, false)).unwrap(), 3);
    }

    #[test]
    fn disjoint_versions_mismatch() {
        let err = negotiate_version(&policy(3, 3, false), &policy(1, 1, false)).unwrap_err();
        assert!(matches!(err, SessionError::VersionMismatch { .. }));
    }

    #[test]
    fn downgrade_requires_both_sides_to_opt_in() {
        // Newer side can speak v2, but the older side never opted in.
        assert!(negotiate_version(&policy(3, 2, true), &policy(2, 2, false)).is_err());
        assert_eq!(negotiate_version(&policy(3, 2, true), &policy(2, 2, true)).unwrap(), 2);
    }

    #[test]
    fn downgrade_outside_newer_range_fails() {
        assert!(negotiate_version(&policy(5, 4, true), &policy(2, 1, true)).is_err());
    }

    #[test]
    fn hello_checksum_detects_tampering() {
        let mut hello = Hello::new(&VersionPolicy::default(), 99);
        assert!(hello.validate().is_ok());
        hello.version += 1;
        assert!(hello.validate().is_err());
    }

    #[test]
    fn session_id_is_order_sensitive_and_deterministic() {
        let a = derive_session_id(1, 2);
        assert_eq!(a, derive_session_id(1, 2));
        assert_ne!(a, derive_session_id(2, 1));
    }

    #[test]
    fn nonces_differ_between_calls() {
        assert_ne!(generate_nonce(b"peer"), generate_nonce(b"peer"));
    }
}
