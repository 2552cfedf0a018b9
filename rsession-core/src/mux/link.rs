//! The two physical I/O loops.
//!
//! The send loop is the only writer of the transport; every channel
//! funnels into it through two bounded submission queues (control and
//! data). The receive loop is the only reader.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::MuxCodec;
use crate::message::{CONTROL_CHANNEL, ControlMessage, DeliveryMode, Message, Priority};
use crate::mux::inbound::Demultiplexer;
use crate::mux::outbound::{Outbound, OutboundQueue, PushOutcome};
use crate::network::{Activity, RawReceiver, RawSender};
use crate::state::SessionSignal;

pub(crate) struct SendLoop {
    pub raw: RawSender,
    pub control_rx: mpsc::Receiver<ControlMessage>,
    pub data_rx: mpsc::Receiver<Outbound>,
    /// Continues the control sequence used during the handshake.
    pub control_sequence: u64,
    pub max_payload: usize,
    pub data_capacity: usize,
    pub flush_timeout: Duration,
    pub signals: mpsc::Sender<SessionSignal>,
    pub cancel: CancellationToken,
}

impl SendLoop {
    fn control_item(&mut self, msg: ControlMessage) -> Option<Outbound> {
        let payload = match msg.to_bytes() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, kind = msg.kind(), "cannot serialize control message");
                return None;
            }
        };
        let seq = self.control_sequence;
        self.control_sequence += 1;
        Some(Outbound {
            message: Message::new(Arc::from(CONTROL_CHANNEL), seq, payload),
            mode: DeliveryMode::ReliableOrdered,
            priority: Priority::Control,
        })
    }

    fn enqueue(queue: &mut OutboundQueue, item: Outbound) {
        if let PushOutcome::Superseded { dropped_sequence } = queue.push(item) {
            trace!(dropped_sequence, "superseded unsent message");
        }
    }

    /// Move everything already submitted into the queue. Data is only
    /// pulled while the queue has room, so backpressure reaches senders.
    fn drain(&mut self, queue: &mut OutboundQueue) {
        while let Ok(msg) = self.control_rx.try_recv() {
            if let Some(item) = self.control_item(msg) {
                Self::enqueue(queue, item);
            }
        }
        while queue.data_len() < self.data_capacity {
            match self.data_rx.try_recv() {
                Ok(item) => Self::enqueue(queue, item),
                Err(_) => break,
            }
        }
    }

    pub async fn run(mut self) {
        let mut queue = OutboundQueue::new();
        let mut codec = MuxCodec::new(self.max_payload);
        let mut buf = BytesMut::new();
        let mut torn = false;

        loop {
            self.drain(&mut queue);

            if let Some(item) = queue.pop() {
                buf.clear();
                if let Err(e) = codec.encode(item.message, &mut buf) {
                    warn!(error = %e, "dropping unencodable message");
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        torn = true;
                        break;
                    }
                    result = self.raw.send(&buf) => {
                        if let Err(e) = result {
                            let signal = SessionSignal::TransportError(e.to_string());
                            let _ = self.signals.send(signal).await;
                            break;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(msg) = self.control_rx.recv() => {
                    if let Some(item) = self.control_item(msg) {
                        Self::enqueue(&mut queue, item);
                    }
                }
                Some(item) = self.data_rx.recv() => Self::enqueue(&mut queue, item),
                else => break,
            }
        }

        // Flush pending control (the goodbye) unless a frame was cut mid-write.
        if !torn {
            while let Ok(msg) = self.control_rx.try_recv() {
                if let Some(item) = self.control_item(msg) {
                    Self::enqueue(&mut queue, item);
                }
            }
            let flush = async {
                while let Some(item) = queue.pop_control() {
                    buf.clear();
                    if codec.encode(item.message, &mut buf).is_err() {
                        continue;
                    }
                    if self.raw.send(&buf).await.is_err() {
                        break;
                    }
                }
            };
            let _ = tokio::time::timeout(self.flush_timeout, flush).await;
        }

        let discarded = queue.clear();
        if discarded > 0 {
            debug!(discarded, "discarded unsent messages");
        }
        self.raw.shutdown().await;
        debug!("send loop stopped");
    }
}

pub(crate) struct RecvLoop {
    pub raw: RawReceiver,
    pub demux: Demultiplexer,
    pub activity: Arc<Activity>,
    pub max_payload: usize,
    pub signals: mpsc::Sender<SessionSignal>,
    pub cancel: CancellationToken,
}

impl RecvLoop {
    pub async fn run(mut self) {
        let mut codec = MuxCodec::new(self.max_payload);
        let mut buf = BytesMut::new();

        'outer: loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                chunk = self.raw.next() => chunk,
            };

            match chunk {
                None => {
                    let _ = self
                        .signals
                        .send(SessionSignal::PeerClosed {
                            code: crate::error::CloseReason::PeerClosed.code(),
                            detail: "stream ended".into(),
                        })
                        .await;
                    break;
                }
                Some(Err(e)) => {
                    let _ = self.signals.send(SessionSignal::TransportError(e.to_string())).await;
                    break;
                }
                Some(Ok(bytes)) => {
                    self.activity.touch_recv();
                    buf.extend_from_slice(&bytes);
                }
            }

            loop {
                let msg = match codec.decode(&mut buf) {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(e) => {
                        let signal = SessionSignal::ProtocolError(e.to_string());
                        let _ = self.signals.send(signal).await;
                        break 'outer;
                    }
                };
                let outcome = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'outer,
                    outcome = self.demux.dispatch(msg) => outcome,
                };
                if let Err(e) = outcome {
                    let _ = self.signals.send(SessionSignal::ProtocolError(e.to_string())).await;
                    break 'outer;
                }
            }
        }

        debug!(stats = ?self.demux.stats(), "receive loop stopped");
    }
}
