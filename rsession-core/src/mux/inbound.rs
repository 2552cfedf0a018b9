//! Demultiplexing: route decoded messages to their channel handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::SessionError;
use crate::flags::Capabilities;
use crate::message::{CONTROL_CHANNEL, ControlMessage, DeliveryMode, Message};
use crate::mux::channel::{ChannelReceiver, ControlSender};
use crate::mux::registry::ChannelRegistry;
use crate::state::SessionSignal;

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Consumed internally by the control-channel router.
    Control,
    /// No such channel registered for receiving; dropped.
    UnknownChannel,
    /// Best-effort message older than one already delivered; dropped.
    Stale,
    /// The application dropped the receiver; dropped.
    Abandoned,
}

/// Counters kept by the demultiplexer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub delivered: u64,
    pub control: u64,
    pub unknown: u64,
    pub stale: u64,
    pub gaps: u64,
}

enum Route {
    Ordered {
        tx: mpsc::Sender<Message>,
        next: u64,
    },
    Latest {
        tx: watch::Sender<Option<Message>>,
        last: Option<u64>,
    },
}

/// Where control-channel traffic goes.
pub(crate) struct ControlRouter {
    pub acks: mpsc::Sender<u64>,
    pub signals: mpsc::Sender<SessionSignal>,
    pub replies: ControlSender,
    /// Flags this side advertised; renegotiation never exceeds them.
    pub local: Capabilities,
}

pub struct Demultiplexer {
    routes: HashMap<Arc<str>, Route>,
    control: Option<ControlRouter>,
    stats: DemuxStats,
}

impl Demultiplexer {
    /// Build routes for every receiving channel in `registry`, returning
    /// the matching receive handles.
    pub fn new(
        registry: &ChannelRegistry,
        capacity: usize,
    ) -> (Self, HashMap<String, ChannelReceiver>) {
        let mut routes = HashMap::new();
        let mut receivers = HashMap::new();

        for spec in registry.iter().filter(|s| s.role.receives()) {
            let (route, receiver) = match spec.mode {
                DeliveryMode::ReliableOrdered => {
                    let (tx, rx) = mpsc::channel(capacity.max(1));
                    (Route::Ordered { tx, next: 0 }, ChannelReceiver::Ordered(rx))
                }
                DeliveryMode::BestEffortLatest => {
                    let (tx, rx) = watch::channel(None);
                    (Route::Latest { tx, last: None }, ChannelReceiver::Latest(rx))
                }
            };
            routes.insert(Arc::clone(&spec.name), route);
            receivers.insert(spec.name.to_string(), receiver);
        }

        let demux = Self {
            routes,
            control: None,
            stats: DemuxStats::default(),
        };
        (demux, receivers)
    }

    pub(crate) fn with_control(mut self, router: ControlRouter) -> Self {
        self.control = Some(router);
        self
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Route one message.
    ///
    /// Only errors that make the link unusable are returned; anything
    /// affecting a single message is logged and reported as a
    /// [`Dispatch`] outcome.
    pub async fn dispatch(&mut self, msg: Message) -> Result<Dispatch, SessionError> {
        if msg.channel() == CONTROL_CHANNEL {
            self.stats.control += 1;
            self.route_control(&msg).await?;
            return Ok(Dispatch::Control);
        }

        let Some(route) = self.routes.get_mut(msg.channel()) else {
            self.stats.unknown += 1;
            let err = SessionError::UnknownChannel(msg.channel().to_string());
            warn!(%err, sequence = msg.sequence(), "dropping message");
            return Ok(Dispatch::UnknownChannel);
        };

        match route {
            Route::Ordered { tx, next } => {
                let seq = msg.sequence();
                if seq < *next {
                    warn!(
                        channel = msg.channel(),
                        seq,
                        expected = *next,
                        "duplicate sequence, dropping"
                    );
                    self.stats.stale += 1;
                    return Ok(Dispatch::Stale);
                }
                if seq > *next {
                    warn!(channel = msg.channel(), seq, expected = *next, "sequence gap");
                    self.stats.gaps += 1;
                }
                *next = seq + 1;
                if tx.send(msg).await.is_err() {
                    debug!("receiver dropped, discarding");
                    return Ok(Dispatch::Abandoned);
                }
            }
            Route::Latest { tx, last } => {
                let seq = msg.sequence();
                if last.is_some_and(|l| seq <= l) {
                    self.stats.stale += 1;
                    return Ok(Dispatch::Stale);
                }
                *last = Some(seq);
                trace!(channel = msg.channel(), seq, "latest slot updated");
                tx.send_replace(Some(msg));
            }
        }

        self.stats.delivered += 1;
        Ok(Dispatch::Delivered)
    }

    async fn route_control(&mut self, msg: &Message) -> Result<(), SessionError> {
        let control = ControlMessage::from_bytes(msg.payload())
            .map_err(|e| SessionError::ProtocolViolation(format!("bad control message: {e}")))?;
        trace!(kind = control.kind(), seq = msg.sequence(), "control message");

        let Some(router) = &self.control else {
            return Ok(());
        };

        match control {
            ControlMessage::KeepAlive => {}
            ControlMessage::FrameAck { frame_index } => {
                if router.acks.try_send(frame_index).is_err() {
                    debug!(frame_index, "ack queue full or closed, dropping ack");
                }
            }
            ControlMessage::Goodbye { code, detail } => {
                let _ = router.signals.send(SessionSignal::PeerClosed { code, detail }).await;
            }
            ControlMessage::Renegotiate { bits } => {
                let agreed = router.local.negotiate(Capabilities::from_wire(bits));
                router.replies.try_send(ControlMessage::RenegotiateAck { bits: agreed.bits() });
                let _ = router
                    .signals
                    .send(SessionSignal::CapabilitiesChanged(agreed))
                    .await;
            }
            ControlMessage::RenegotiateAck { bits } => {
                let agreed = router.local.negotiate(Capabilities::from_wire(bits));
                let _ = router
                    .signals
                    .send(SessionSignal::CapabilitiesChanged(agreed))
                    .await;
            }
            other @ (ControlMessage::Hello(_) | ControlMessage::Capabilities { .. }) => {
                return Err(SessionError::ProtocolViolation(format!(
                    "{} after handshake",
                    other.kind()
                )));
            }
        }
        Ok(())
    }
}
