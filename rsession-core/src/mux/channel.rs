//! Per-channel handles handed to application code.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::error::SessionError;
use crate::message::{ControlMessage, DeliveryMode, Message};
use crate::mux::outbound::Outbound;
use crate::mux::registry::ChannelSpec;
use crate::state::SessionState;

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the send loop with this sequence number.
    Queued(u64),
    /// Best-effort message shed because the submission queue was full.
    Shed(u64),
    /// The session is not `Active`/`Degraded`; nothing happened.
    Inactive,
}

// ── ChannelSender ────────────────────────────────────────────────

/// Single-producer send handle for one channel.
///
/// Owns the channel's sequence counter, so it is deliberately not
/// `Clone`: one handle, one monotonic sequence.
pub struct ChannelSender {
    spec: ChannelSpec,
    next_sequence: u64,
    max_payload: usize,
    submit: mpsc::Sender<Outbound>,
    state: watch::Receiver<SessionState>,
}

impl ChannelSender {
    pub(crate) fn new(
        spec: ChannelSpec,
        max_payload: usize,
        submit: mpsc::Sender<Outbound>,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            spec,
            next_sequence: 0,
            max_payload,
            submit,
            state,
        }
    }

    pub fn channel(&self) -> &str {
        &self.spec.name
    }

    pub fn mode(&self) -> DeliveryMode {
        self.spec.mode
    }

    /// Sequence the next accepted message will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Send one payload.
    ///
    /// Reliable channels wait for room in the submission queue;
    /// best-effort channels never wait and shed instead.
    pub async fn send(&mut self, payload: Bytes) -> Result<SendOutcome, SessionError> {
        if !self.state.borrow().is_operational() {
            return Ok(SendOutcome::Inactive);
        }
        if payload.len() > self.max_payload {
            return Err(SessionError::FrameTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let item = Outbound {
            message: Message::new(Arc::clone(&self.spec.name), sequence, payload),
            mode: self.spec.mode,
            priority: self.spec.priority,
        };

        match self.spec.mode {
            DeliveryMode::ReliableOrdered => match self.submit.send(item).await {
                Ok(()) => Ok(SendOutcome::Queued(sequence)),
                // Send loop already gone: the session is shutting down.
                Err(_) => Ok(SendOutcome::Inactive),
            },
            DeliveryMode::BestEffortLatest => match self.submit.try_send(item) {
                Ok(()) => Ok(SendOutcome::Queued(sequence)),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(channel = %self.spec.name, sequence, "submission queue full, shedding");
                    Ok(SendOutcome::Shed(sequence))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Ok(SendOutcome::Inactive),
            },
        }
    }
}

impl fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("channel", &self.spec.name)
            .field("mode", &self.spec.mode)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

// ── ChannelReceiver ──────────────────────────────────────────────

/// Receive handle for one channel.
#[derive(Debug)]
pub enum ChannelReceiver {
    /// Every message, in order.
    Ordered(mpsc::Receiver<Message>),
    /// Only the newest message is kept; older undelivered ones vanish.
    Latest(watch::Receiver<Option<Message>>),
}

impl ChannelReceiver {
    /// Next message, or `None` once the session's receive loop stops.
    pub async fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Ordered(rx) => rx.recv().await,
            Self::Latest(rx) => loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(msg) = rx.borrow_and_update().clone() {
                    return Some(msg);
                }
            },
        }
    }
}

// ── ControlSender ────────────────────────────────────────────────

/// Cloneable handle for enqueueing control-channel messages.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: mpsc::Sender<ControlMessage>,
    state: watch::Receiver<SessionState>,
}

impl ControlSender {
    pub(crate) fn new(
        tx: mpsc::Sender<ControlMessage>,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self { tx, state }
    }

    /// Acknowledge that `frame_index` has been displayed. Returns
    /// `false` when the session is not accepting traffic.
    pub async fn ack_frame(&self, frame_index: u64) -> bool {
        self.send(ControlMessage::FrameAck { frame_index }).await
    }

    pub(crate) async fn send(&self, msg: ControlMessage) -> bool {
        if !self.state.borrow().is_operational() {
            return false;
        }
        self.tx.send(msg).await.is_ok()
    }

    /// Enqueue without waiting and without the state check; used by
    /// loops that must not stall and for the goodbye while closing.
    pub(crate) fn try_send(&self, msg: ControlMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::registry::ChannelRole;

    fn sender(
        mode: DeliveryMode,
        cap: usize,
        state: SessionState,
    ) -> (ChannelSender, mpsc::Receiver<Outbound>, watch::Sender<SessionState>) {
        let (tx, rx) = mpsc::channel(cap);
        let (state_tx, state_rx) = watch::channel(state);
        let spec = ChannelSpec::new("test", mode, ChannelRole::Send);
        (ChannelSender::new(spec, 16, tx, state_rx), rx, state_tx)
    }

    #[tokio::test]
    async fn sequences_are_assigned_at_send() {
        let (mut tx, mut rx, _state) =
            sender(DeliveryMode::ReliableOrdered, 8, SessionState::Active);
        for expected in 0..3 {
            assert_eq!(
                tx.send(Bytes::from_static(b"x")).await.unwrap(),
                SendOutcome::Queued(expected)
            );
        }
        for expected in 0..3 {
            assert_eq!(rx.recv().await.unwrap().message.sequence(), expected);
        }
    }

    #[tokio::test]
    async fn inactive_session_is_a_no_op() {
        let (mut tx, mut rx, state) =
            sender(DeliveryMode::ReliableOrdered, 8, SessionState::Closing);
        assert_eq!(tx.send(Bytes::from_static(b"x")).await.unwrap(), SendOutcome::Inactive);
        assert!(rx.try_recv().is_err());
        assert_eq!(tx.next_sequence(), 0);

        state.send_replace(SessionState::Degraded);
        assert_eq!(tx.send(Bytes::from_static(b"x")).await.unwrap(), SendOutcome::Queued(0));
    }

    #[tokio::test]
    async fn best_effort_sheds_when_full() {
        let (mut tx, _rx, _state) = sender(DeliveryMode::BestEffortLatest, 1, SessionState::Active);
        assert_eq!(tx.send(Bytes::from_static(b"a")).await.unwrap(), SendOutcome::Queued(0));
        assert_eq!(tx.send(Bytes::from_static(b"b")).await.unwrap(), SendOutcome::Shed(1));
    }

    #[tokio::test]
    async fn oversize_payload_is_refused() {
        let (mut tx, _rx, _state) = sender(DeliveryMode::ReliableOrdered, 1, SessionState::Active);
        let err = tx.send(Bytes::from(vec![0u8; 17])).await.unwrap_err();
        assert!(matches!(err, SessionError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn latest_receiver_skips_to_newest() {
        let (tx, rx) = watch::channel(None);
        let mut receiver = ChannelReceiver::Latest(rx);
        tx.send_replace(Some(Message::new(Arc::from("f"), 1, Bytes::new())));
        tx.send_replace(Some(Message::new(Arc::from("f"), 2, Bytes::new())));
        assert_eq!(receiver.recv().await.unwrap().sequence(), 2);
        drop(tx);
        assert!(receiver.recv().await.is_none());
    }
}
