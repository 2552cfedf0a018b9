//! The physical link: TCP establishment, handshake, raw byte I/O.
//!
//! A [`Connection`] exclusively owns the `TcpStream`. It frames the
//! handshake itself (on the control channel) and then hands the stream
//! over as a [`RawSender`] / [`RawReceiver`] pair. From that point on
//! framing is the multiplexer's job; the link only moves bytes.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::codec::{BytesCodec, Framed, FramedParts, FramedRead};
use tracing::{debug, info};

use crate::codec::MuxCodec;
use crate::error::SessionError;
use crate::flags::Capabilities;
use crate::message::{CONTROL_CHANNEL, ControlMessage, Message};
use crate::network::handshake::{
    Hello, Role, SessionId, VersionPolicy, derive_session_id, generate_nonce, negotiate_version,
};

/// Port used when an address carries none.
pub const DEFAULT_PORT: u16 = 2049;

// ── ConnectionInfo ───────────────────────────────────────────────

/// A host/port pair as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]`, falling back to [`DEFAULT_PORT`].
    pub fn parse(address: &str) -> Result<Self, SessionError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SessionError::Other("empty address".into()));
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| SessionError::Other(format!("invalid port in {address}")))?;
                Ok(Self::new(host, port))
            }
            _ => Ok(Self::new(address, DEFAULT_PORT)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Activity ─────────────────────────────────────────────────────

/// Last-traffic timestamps, written by the I/O loops and read by the
/// heartbeat monitor.
#[derive(Debug)]
pub struct Activity {
    epoch: Instant,
    last_sent_ms: AtomicU64,
    last_recv_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_sent_ms: AtomicU64::new(0),
            last_recv_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn touch_sent(&self) {
        self.last_sent_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    pub fn touch_recv(&self) {
        self.last_recv_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since anything arrived from the peer.
    pub fn since_recv(&self) -> Duration {
        let last = self.last_recv_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Time since this side last wrote anything.
    pub fn since_sent(&self) -> Duration {
        let last = self.last_sent_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Time since traffic in either direction.
    pub fn since_any(&self) -> Duration {
        let last = self
            .last_recv_ms
            .load(Ordering::Relaxed)
            .max(self.last_sent_ms.load(Ordering::Relaxed));
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

// ── Negotiated ───────────────────────────────────────────────────

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub session_id: SessionId,
    pub version: u16,
    pub capabilities: Capabilities,
    pub peer: SocketAddr,
    pub role: Role,
}

// ── Connection ───────────────────────────────────────────────────

/// One physical link to one remote peer.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    role: Role,
    framed: Option<Framed<TcpStream, MuxCodec>>,
    local_nonce: u64,
    version: Option<u16>,
    session_id: Option<SessionId>,
    capabilities: Option<Capabilities>,
    control_seq: u64,
    activity: Arc<Activity>,
    releases: u32,
}

impl Connection {
    /// Establish the transport to `address` within `timeout`.
    pub async fn open(
        address: &ConnectionInfo,
        role: Role,
        timeout: Duration,
        max_payload: usize,
    ) -> Result<Self, SessionError> {
        let addr = address.to_string();
        debug!(%addr, "opening transport");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Err(_) => {
                return Err(SessionError::Connect {
                    addr,
                    reason: format!("timed out after {timeout:?}"),
                });
            }
            Ok(Err(e)) => {
                return Err(SessionError::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Ok(Ok(stream)) => stream,
        };
        Self::from_stream(stream, role, max_payload)
    }

    /// Wrap an already-accepted stream.
    pub fn from_stream(
        stream: TcpStream,
        role: Role,
        max_payload: usize,
    ) -> Result<Self, SessionError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            peer,
            role,
            framed: Some(Framed::new(stream, MuxCodec::new(max_payload))),
            local_nonce: generate_nonce(peer.to_string().as_bytes()),
            version: None,
            session_id: None,
            capabilities: None,
            control_seq: 0,
            activity: Arc::new(Activity::new()),
            releases: 0,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn version(&self) -> Option<u16> {
        self.version
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn activity(&self) -> Arc<Activity> {
        Arc::clone(&self.activity)
    }

    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }

    /// Next control-channel sequence number; the multiplexer continues
    /// from here so control sequences stay gap-free across the handover.
    pub fn control_sequence(&self) -> u64 {
        self.control_seq
    }

    // ── Handshake ────────────────────────────────────────────────

    /// Step 1: exchange hellos and agree on a protocol version.
    pub async fn exchange_versions(
        &mut self,
        policy: &VersionPolicy,
        timeout: Duration,
    ) -> Result<u16, SessionError> {
        let hello = Hello::new(policy, self.local_nonce);
        self.send_control(ControlMessage::Hello(hello)).await?;

        let remote = match self.recv_control(timeout).await? {
            ControlMessage::Hello(h) => h,
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "expected hello, got {}",
                    other.kind()
                )));
            }
        };
        remote.validate()?;

        let version = negotiate_version(policy, &remote.policy())?;
        let session_id = match self.role {
            Role::Host => derive_session_id(self.local_nonce, remote.nonce),
            Role::Viewer => derive_session_id(remote.nonce, self.local_nonce),
        };

        self.version = Some(version);
        self.session_id = Some(session_id);
        info!(peer = %self.peer, version, session = %session_id, "protocol version agreed");
        Ok(version)
    }

    /// Step 2: exchange capability flags; the result is the intersection.
    pub async fn exchange_capabilities(
        &mut self,
        local: Capabilities,
        timeout: Duration,
    ) -> Result<Capabilities, SessionError> {
        if self.version.is_none() {
            return Err(SessionError::InvalidTransition {
                from: "connecting",
                event: "exchange capabilities",
            });
        }

        self.send_control(ControlMessage::Capabilities { bits: local.bits() })
            .await?;

        let remote = match self.recv_control(timeout).await? {
            ControlMessage::Capabilities { bits } => Capabilities::from_wire(bits),
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "expected capabilities, got {}",
                    other.kind()
                )));
            }
        };

        let agreed = local.negotiate(remote);
        self.capabilities = Some(agreed);
        info!(peer = %self.peer, capabilities = ?agreed, "capabilities agreed");
        Ok(agreed)
    }

    /// Run both handshake steps.
    pub async fn handshake(
        &mut self,
        policy: &VersionPolicy,
        capabilities: Capabilities,
        timeout: Duration,
    ) -> Result<Negotiated, SessionError> {
        self.exchange_versions(policy, timeout).await?;
        self.exchange_capabilities(capabilities, timeout).await?;
        self.negotiated()
    }

    /// The handshake result, once both steps have completed.
    pub fn negotiated(&self) -> Result<Negotiated, SessionError> {
        match (self.session_id, self.version, self.capabilities) {
            (Some(session_id), Some(version), Some(capabilities)) => Ok(Negotiated {
                session_id,
                version,
                capabilities,
                peer: self.peer,
                role: self.role,
            }),
            _ => Err(SessionError::InvalidTransition {
                from: "handshaking",
                event: "read negotiated parameters",
            }),
        }
    }

    async fn send_control(&mut self, msg: ControlMessage) -> Result<(), SessionError> {
        let payload = msg.to_bytes()?;
        let seq = self.control_seq;
        let framed = self.framed.as_mut().ok_or(SessionError::ChannelClosed)?;
        framed
            .send(Message::new(Arc::from(CONTROL_CHANNEL), seq, payload))
            .await?;
        self.control_seq += 1;
        self.activity.touch_sent();
        Ok(())
    }

    async fn recv_control(&mut self, timeout: Duration) -> Result<ControlMessage, SessionError> {
        let framed = self.framed.as_mut().ok_or(SessionError::ChannelClosed)?;
        let msg = match tokio::time::timeout(timeout, framed.next()).await {
            Err(_) => return Err(SessionError::HandshakeTimeout(timeout)),
            Ok(None) => {
                return Err(SessionError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed during handshake",
                )));
            }
            Ok(Some(result)) => result?,
        };
        self.activity.touch_recv();

        if msg.channel() != CONTROL_CHANNEL {
            return Err(SessionError::ProtocolViolation(format!(
                "data on {} before handshake completed",
                msg.channel()
            )));
        }
        match ControlMessage::from_bytes(msg.payload())? {
            ControlMessage::Goodbye { detail, .. } => Err(SessionError::ProtocolViolation(format!(
                "peer aborted handshake: {detail}"
            ))),
            other => Ok(other),
        }
    }

    // ── Handover / teardown ──────────────────────────────────────

    /// Give up ownership of the stream as raw byte I/O.
    ///
    /// Bytes the handshake already buffered past its last frame are
    /// replayed first by the receiver.
    pub fn into_link(mut self) -> Result<(RawSender, RawReceiver), SessionError> {
        let framed = self.framed.take().ok_or(SessionError::ChannelClosed)?;
        let FramedParts { io, read_buf, .. } = framed.into_parts();
        let (read_half, write_half) = io.into_split();
        let sender = RawSender {
            writer: Some(write_half),
            activity: Arc::clone(&self.activity),
        };
        let receiver = RawReceiver::new(read_half, read_buf);
        Ok((sender, receiver))
    }

    /// Release the transport. Safe to call any number of times.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(framed) = self.framed.take() {
            let mut stream = framed.into_inner();
            // The peer may already be gone.
            let _ = stream.shutdown().await;
            self.releases += 1;
            debug!(peer = %self.peer, "transport released");
        }
        Ok(())
    }

    /// How many times the transport was actually released (0 or 1).
    pub fn release_count(&self) -> u32 {
        self.releases
    }
}

// ── RawSender / RawReceiver ──────────────────────────────────────

/// Write half of the link. The send loop is its only user.
#[derive(Debug)]
pub struct RawSender {
    writer: Option<OwnedWriteHalf>,
    activity: Arc<Activity>,
}

impl RawSender {
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::ChannelClosed)?;
        writer.write_all(bytes).await?;
        self.activity.touch_sent();
        Ok(())
    }

    /// Flush and half-close. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Read half of the link: a lazy sequence of raw byte chunks.
pub struct RawReceiver {
    inner: BoxStream<'static, io::Result<BytesMut>>,
}

impl RawReceiver {
    /// `leftover` holds bytes already read past the handshake; they come
    /// out before anything else from `reader`.
    fn new<R>(reader: R, leftover: BytesMut) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        let chunks = FramedRead::new(reader, BytesCodec::new());
        let inner = if leftover.is_empty() {
            chunks.boxed()
        } else {
            stream::once(async move { Ok(leftover) }).chain(chunks).boxed()
        };
        Self { inner }
    }

    /// Build a receiver over an arbitrary chunk stream (tests, adapters).
    pub fn from_chunks<S>(chunks: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: chunks.map(|r| r.map(|b| BytesMut::from(&b[..]))).boxed(),
        }
    }
}

impl Stream for RawReceiver {
    type Item = io::Result<BytesMut>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for RawReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawReceiver").finish_non_exhaustive()
    }
}
