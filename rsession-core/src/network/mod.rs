//! Physical link management: TCP establishment, handshake, raw I/O.

pub mod connection;
pub mod handshake;
pub(crate) mod heartbeat;

pub use connection::{
    Activity, Connection, ConnectionInfo, DEFAULT_PORT, Negotiated, RawReceiver, RawSender,
};
pub use handshake::{
    Hello, PROTOCOL_MAGIC, PROTOCOL_VERSION, Role, SessionId, VersionPolicy, derive_session_id,
    negotiate_version,
};
