//! A live session: one handshaken connection plus its multiplexer,
//! heartbeat and state driver.
//!
//! ```text
//!                ┌──────────── Session (handle) ────────────┐
//!                │ senders / receivers / acks / signals     │
//!                └──────┬───────────────────────────▲───────┘
//!                       ▼                           │
//!   send loop ◄── submission queues      state / capabilities / closed (watch)
//!   recv loop ──► Demultiplexer                     │
//!   heartbeat ──► SessionSignal ──► SessionDriver ──┘
//! ```

use std::collections::HashMap;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{CloseReason, SessionError};
use crate::flags::Capabilities;
use crate::message::ControlMessage;
use crate::mux::inbound::ControlRouter;
use crate::mux::link::{RecvLoop, SendLoop};
use crate::mux::{ChannelReceiver, ChannelRegistry, ChannelSender, ControlSender, Demultiplexer};
use crate::network::heartbeat::run_heartbeat;
use crate::network::{Connection, ConnectionInfo, Negotiated, Role, SessionId};
use crate::state::driver::SessionDriver;
use crate::state::{SessionSignal, SessionState, SessionStateMachine};

const SIGNAL_CAPACITY: usize = 32;
const CONTROL_CAPACITY: usize = 32;
const ACK_CAPACITY: usize = 64;

pub struct Session {
    negotiated: Negotiated,
    local_capabilities: Capabilities,
    state: watch::Receiver<SessionState>,
    capabilities: watch::Receiver<Capabilities>,
    closed: watch::Receiver<Option<CloseReason>>,
    signals: mpsc::Sender<SessionSignal>,
    control: ControlSender,
    senders: HashMap<String, ChannelSender>,
    receivers: HashMap<String, ChannelReceiver>,
    acks: Option<mpsc::Receiver<u64>>,
}

impl Session {
    /// Viewer side: open the transport and run the handshake.
    pub async fn connect(
        address: &ConnectionInfo,
        registry: ChannelRegistry,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut machine = SessionStateMachine::new();
        machine.begin_connect()?;
        let opened =
            Connection::open(address, Role::Viewer, config.connect_timeout, config.max_payload)
                .await;
        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                let _ = machine.fail(CloseReason::Transport(e.to_string()));
                return Err(e);
            }
        };
        Self::establish(conn, machine, registry, config).await
    }

    /// Host side: run the handshake over an accepted stream.
    pub async fn accept(
        stream: TcpStream,
        registry: ChannelRegistry,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut machine = SessionStateMachine::new();
        machine.begin_connect()?;
        let conn = match Connection::from_stream(stream, Role::Host, config.max_payload) {
            Ok(conn) => conn,
            Err(e) => {
                let _ = machine.fail(CloseReason::Transport(e.to_string()));
                return Err(e);
            }
        };
        Self::establish(conn, machine, registry, config).await
    }

    async fn negotiate(
        conn: &mut Connection,
        machine: &mut SessionStateMachine,
        config: &SessionConfig,
    ) -> Result<Negotiated, SessionError> {
        conn.exchange_versions(&config.version, config.handshake_timeout)
            .await?;
        machine.versions_agreed()?;
        conn.exchange_capabilities(config.capabilities, config.handshake_timeout)
            .await?;
        machine.capabilities_agreed()?;
        conn.negotiated()
    }

    async fn establish(
        mut conn: Connection,
        mut machine: SessionStateMachine,
        registry: ChannelRegistry,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let negotiated = match Self::negotiate(&mut conn, &mut machine, &config).await {
            Ok(n) => n,
            Err(e) => {
                let reason = match &e {
                    SessionError::Io(_) | SessionError::HandshakeTimeout(_) => {
                        CloseReason::Transport(e.to_string())
                    }
                    _ => CloseReason::Protocol(e.to_string()),
                };
                let _ = machine.fail(reason);
                conn.close().await?;
                return Err(e);
            }
        };

        info!(
            peer = %negotiated.peer,
            session = %negotiated.session_id,
            role = %negotiated.role,
            "session active"
        );

        let activity = conn.activity();
        let control_sequence = conn.control_sequence();
        let (raw_tx, raw_rx) = conn.into_link()?;

        let (state_tx, state_rx) = watch::channel(machine.state());
        let (caps_tx, caps_rx) = watch::channel(negotiated.capabilities);
        let (closed_tx, closed_rx) = watch::channel(None);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (data_tx, data_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let (ack_tx, ack_rx) = mpsc::channel(ACK_CAPACITY);
        let cancel = CancellationToken::new();
        let control = ControlSender::new(control_tx, state_rx.clone());

        let senders = registry
            .iter()
            .filter(|spec| spec.role.sends())
            .map(|spec| {
                let sender = ChannelSender::new(
                    spec.clone(),
                    config.max_payload,
                    data_tx.clone(),
                    state_rx.clone(),
                );
                (spec.name.to_string(), sender)
            })
            .collect();
        drop(data_tx);

        let (demux, receivers) = Demultiplexer::new(&registry, config.recv_queue_capacity);
        let demux = demux.with_control(ControlRouter {
            acks: ack_tx,
            signals: signal_tx.clone(),
            replies: control.clone(),
            local: config.capabilities,
        });

        let send_loop = SendLoop {
            raw: raw_tx,
            control_rx,
            data_rx,
            control_sequence,
            max_payload: config.max_payload,
            data_capacity: config.send_queue_capacity.max(1),
            flush_timeout: config.close_flush_timeout,
            signals: signal_tx.clone(),
            cancel: cancel.clone(),
        };
        let recv_loop = RecvLoop {
            raw: raw_rx,
            demux,
            activity: activity.clone(),
            max_payload: config.max_payload,
            signals: signal_tx.clone(),
            cancel: cancel.clone(),
        };
        let tasks = vec![
            tokio::spawn(send_loop.run()),
            tokio::spawn(recv_loop.run()),
            tokio::spawn(run_heartbeat(
                activity,
                config.heartbeat,
                control.clone(),
                signal_tx.clone(),
                cancel.clone(),
            )),
        ];

        let driver = SessionDriver {
            machine,
            signals: signal_rx,
            state_tx,
            caps_tx,
            closed_tx,
            control: control.clone(),
            cancel,
            tasks,
            release_timeout: config.heartbeat.grace,
            silent: false,
            congested: false,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            negotiated,
            local_capabilities: config.capabilities,
            state: state_rx,
            capabilities: caps_rx,
            closed: closed_rx,
            signals: signal_tx,
            control,
            senders,
            receivers,
            acks: Some(ack_rx),
        })
    }

    // ── Identity ─────────────────────────────────────────────────

    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    pub fn session_id(&self) -> SessionId {
        self.negotiated.session_id
    }

    pub fn version(&self) -> u16 {
        self.negotiated.version
    }

    // ── State ────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// The capability set currently in force.
    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.borrow()
    }

    pub fn watch_capabilities(&self) -> watch::Receiver<Capabilities> {
        self.capabilities.clone()
    }

    // ── Channels ─────────────────────────────────────────────────

    /// The send handle for `channel`. Each handle can be taken once.
    pub fn take_sender(&mut self, channel: &str) -> Option<ChannelSender> {
        self.senders.remove(channel)
    }

    /// The receive handle for `channel`. Each handle can be taken once.
    pub fn take_receiver(&mut self, channel: &str) -> Option<ChannelReceiver> {
        self.receivers.remove(channel)
    }

    /// Frame indices acknowledged by the peer.
    pub fn take_acks(&mut self) -> Option<mpsc::Receiver<u64>> {
        self.acks.take()
    }

    /// Handle for acknowledging displayed frames.
    pub fn ack_sender(&self) -> ControlSender {
        self.control.clone()
    }

    /// Channel for components that need to escalate to the state
    /// machine (congestion, fatal failures).
    pub fn signals(&self) -> mpsc::Sender<SessionSignal> {
        self.signals.clone()
    }

    /// Propose a new capability set. The peer answers with the
    /// intersection; both sides adopt it when the answer arrives.
    /// Returns `false` if the session is not operational.
    pub async fn renegotiate(&self, proposed: Capabilities) -> bool {
        let bits = self.local_capabilities.negotiate(proposed).bits();
        self.control.send(ControlMessage::Renegotiate { bits }).await
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Close the session and wait until its resources are released.
    /// Calling this more than once is harmless.
    pub async fn close(&self) -> CloseReason {
        let _ = self.signals.send(SessionSignal::CloseRequested).await;
        self.closed().await
    }

    /// Resolves once the session has reached `Closed`, with the reason.
    pub async fn closed(&self) -> CloseReason {
        let mut closed = self.closed.clone();
        match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason
                .clone()
                .unwrap_or_else(|| CloseReason::Fatal("close reason missing".into())),
            Err(_) => CloseReason::Fatal("session driver stopped".into()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.signals.try_send(SessionSignal::CloseRequested);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("negotiated", &self.negotiated)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
