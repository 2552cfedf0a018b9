//! Controller side of the input relay.
//!
//! The OS input collaborator pushes raw events into an [`InputFeed`];
//! [`InputCapture::capture`] turns them into a lazy, timestamped
//! stream that [`InputSender`] forwards to `rs.input` one at a time.

use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::input::event::{InputAction, InputEvent, InputKind};
use crate::mux::{ChannelSender, SendOutcome};

const DEFAULT_FEED_CAPACITY: usize = 256;

// ── InputFeed ────────────────────────────────────────────────────

/// Producer half handed to the input-capture collaborator.
///
/// Stamps every event on entry. Single producer, so stamps are
/// non-decreasing in push order.
#[derive(Debug)]
pub struct InputFeed {
    tx: mpsc::Sender<InputEvent>,
    epoch: Instant,
    last_us: u64,
}

impl InputFeed {
    fn stamp(&mut self, kind: InputKind, action: InputAction) -> InputEvent {
        let now = self.epoch.elapsed().as_micros() as u64;
        self.last_us = self.last_us.max(now);
        InputEvent {
            kind,
            action,
            origin_us: self.last_us,
        }
    }

    /// Waits for room. Fails once the capture side is gone.
    pub async fn push(&mut self, kind: InputKind, action: InputAction) -> Result<(), SessionError> {
        let event = self.stamp(kind, action);
        self.tx.send(event).await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Never waits; a full feed drops the event and reports it.
    pub fn try_push(&mut self, kind: InputKind, action: InputAction) -> Result<(), SessionError> {
        let event = self.stamp(kind, action);
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(?kind, ?action, "input feed full, event dropped");
                Err(SessionError::Other("input feed full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::ChannelClosed),
        }
    }
}

// ── InputCapture ─────────────────────────────────────────────────

/// Consumer half. Consumed by [`capture`](Self::capture), so a
/// capture cannot be restarted.
#[derive(Debug)]
pub struct InputCapture {
    rx: mpsc::Receiver<InputEvent>,
}

impl InputCapture {
    pub fn new() -> (InputFeed, Self) {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (InputFeed, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let feed = InputFeed {
            tx,
            epoch: Instant::now(),
            last_us: 0,
        };
        (feed, Self { rx })
    }

    /// Events in push order. Ends once the feed is dropped.
    pub fn capture(self) -> impl Stream<Item = InputEvent> + Send + Unpin + 'static {
        futures::stream::unfold(self.rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
        .boxed()
    }
}

// ── InputSender ──────────────────────────────────────────────────

/// Sends each event on `rs.input` as soon as it is produced.
#[derive(Debug)]
pub struct InputSender {
    channel: ChannelSender,
    sent: u64,
}

impl InputSender {
    pub fn new(channel: ChannelSender) -> Self {
        Self { channel, sent: 0 }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub async fn send(&mut self, event: &InputEvent) -> Result<SendOutcome, SessionError> {
        event.validate()?;
        let payload = event.to_bytes()?;
        let outcome = self.channel.send(payload.into()).await?;
        if let SendOutcome::Queued(sequence) = outcome {
            self.sent += 1;
            trace!(sequence, device = ?event.device(), action = ?event.action, "input sent");
        }
        Ok(outcome)
    }

    /// Drain `events` until it ends, the session stops or `cancel`
    /// fires. Returns the number of events queued.
    pub async fn forward<S>(mut self, mut events: S, cancel: CancellationToken) -> u64
    where
        S: Stream<Item = InputEvent> + Unpin,
    {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                e = events.next() => e,
            };
            let Some(event) = event else {
                debug!("input capture finished");
                break;
            };
            match self.send(&event).await {
                Ok(SendOutcome::Inactive) => {
                    debug!("session inactive, input forwarding stopped");
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "input event not sent"),
            }
        }
        info!(sent = self.sent, "input forwarding stopped");
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;
    use crate::input::event::{NormalizedPoint, PointerButton};
    use crate::message::{DeliveryMode, INPUT_CHANNEL};
    use crate::mux::{ChannelRole, ChannelSpec, Outbound};
    use crate::state::SessionState;

    fn pointer(x: f32) -> InputKind {
        InputKind::Pointer {
            position: NormalizedPoint::new(x, 0.5),
            button: PointerButton::None,
        }
    }

    #[tokio::test]
    async fn capture_yields_in_push_order_with_monotonic_stamps() {
        let (mut feed, capture) = InputCapture::new();
        for i in 0..5 {
            feed.push(pointer(i as f32 / 10.0), InputAction::Move).await.unwrap();
        }
        drop(feed);

        let events: Vec<InputEvent> = capture.capture().collect().await;
        assert_eq!(events.len(), 5);
        for pair in events.windows(2) {
            assert!(pair[0].origin_us <= pair[1].origin_us);
        }
        let xs: Vec<f32> = events.iter().map(|e| e.position().unwrap().x).collect();
        assert_eq!(xs, vec![0.0, 0.1, 0.2, 0.3, 0.4]);
    }

    #[tokio::test]
    async fn push_fails_after_capture_is_dropped() {
        let (mut feed, capture) = InputCapture::with_capacity(1);
        drop(capture);
        assert!(matches!(
            feed.push(pointer(0.0), InputAction::Move).await,
            Err(SessionError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn try_push_reports_a_full_feed() {
        let (mut feed, _capture) = InputCapture::with_capacity(1);
        feed.try_push(pointer(0.0), InputAction::Down).unwrap();
        assert!(feed.try_push(pointer(0.0), InputAction::Up).is_err());
    }

    #[tokio::test]
    async fn forward_sends_every_event_in_order() {
        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(16);
        let (_state_tx, state_rx) = watch::channel(SessionState::Active);
        let spec =
            ChannelSpec::new(INPUT_CHANNEL, DeliveryMode::ReliableOrdered, ChannelRole::Send);
        let sender = InputSender::new(ChannelSender::new(spec, 1024, out_tx, state_rx));

        let (mut feed, capture) = InputCapture::new();
        let key = InputKind::Key {
            code: 65,
            character: Some('a'),
            repeat: false,
        };
        feed.push(key, InputAction::Down).await.unwrap();
        feed.push(InputKind::Key { code: 65, character: Some('a'), repeat: false }, InputAction::Up)
            .await
            .unwrap();
        drop(feed);

        let sent = sender.forward(capture.capture(), CancellationToken::new()).await;
        assert_eq!(sent, 2);

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first.message.sequence(), 0);
        assert_eq!(second.message.sequence(), 1);
        let down = InputEvent::from_bytes(first.message.payload()).unwrap();
        assert_eq!(down.action, InputAction::Down);
    }

    #[tokio::test]
    async fn key_move_is_never_sent() {
        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(4);
        let (_state_tx, state_rx) = watch::channel(SessionState::Active);
        let spec =
            ChannelSpec::new(INPUT_CHANNEL, DeliveryMode::ReliableOrdered, ChannelRole::Send);
        let mut sender = InputSender::new(ChannelSender::new(spec, 1024, out_tx, state_rx));

        let bad = InputEvent::key(1, None, InputAction::Move);
        assert!(sender.send(&bad).await.is_err());
        assert!(out_rx.try_recv().is_err());
    }
}
