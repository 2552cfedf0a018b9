//! Host → viewer feedback on `rs.feedback`: cursor and haptics.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::SessionError;
use crate::flags::Capabilities;
use crate::input::event::NormalizedPoint;
use crate::mux::{ChannelReceiver, ChannelSender, SendOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeedbackEvent {
    Cursor {
        position: NormalizedPoint,
        visible: bool,
    },
    Haptic {
        /// 0..=1.
        intensity: f32,
        duration_ms: u32,
    },
}

impl FeedbackEvent {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Sends feedback only while `FEEDBACK` is negotiated.
#[derive(Debug)]
pub struct FeedbackSender {
    channel: ChannelSender,
    capabilities: watch::Receiver<Capabilities>,
}

impl FeedbackSender {
    pub fn new(channel: ChannelSender, capabilities: watch::Receiver<Capabilities>) -> Self {
        Self { channel, capabilities }
    }

    /// `Ok(None)` when the peer did not negotiate feedback.
    pub async fn send(
        &mut self,
        event: FeedbackEvent,
    ) -> Result<Option<SendOutcome>, SessionError> {
        if !self.capabilities.borrow().contains(Capabilities::FEEDBACK) {
            trace!("feedback not negotiated, skipped");
            return Ok(None);
        }
        let payload = event.to_bytes()?;
        self.channel.send(payload.into()).await.map(Some)
    }
}

#[derive(Debug)]
pub struct FeedbackReceiver {
    channel: ChannelReceiver,
}

impl FeedbackReceiver {
    pub fn new(channel: ChannelReceiver) -> Self {
        Self { channel }
    }

    /// Next decodable event; malformed payloads are logged and skipped.
    pub async fn recv(&mut self) -> Option<FeedbackEvent> {
        loop {
            let msg = self.channel.recv().await?;
            match FeedbackEvent::from_bytes(msg.payload()) {
                Ok(event) => return Some(event),
                Err(e) => {
                    warn!(sequence = msg.sequence(), error = %e, "dropping undecodable feedback")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::message::{DeliveryMode, FEEDBACK_CHANNEL, Message};
    use crate::mux::{ChannelRole, ChannelSpec};
    use crate::state::SessionState;

    #[tokio::test]
    async fn skipped_without_negotiated_flag() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (_state_tx, state_rx) = watch::channel(SessionState::Active);
        let (caps_tx, caps_rx) = watch::channel(Capabilities::POINTER);
        let spec =
            ChannelSpec::new(FEEDBACK_CHANNEL, DeliveryMode::ReliableOrdered, ChannelRole::Send);
        let channel = ChannelSender::new(spec, 1024, out_tx, state_rx);
        let mut sender = FeedbackSender::new(channel, caps_rx);

        let haptic = FeedbackEvent::Haptic {
            intensity: 0.5,
            duration_ms: 20,
        };
        assert_eq!(sender.send(haptic).await.unwrap(), None);
        assert!(out_rx.try_recv().is_err());

        caps_tx.send_replace(Capabilities::FEEDBACK);
        assert_eq!(sender.send(haptic).await.unwrap(), Some(SendOutcome::Queued(0)));
        assert!(out_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn receiver_skips_garbage() {
        let (tx, rx) = mpsc::channel(4);
        let mut receiver = FeedbackReceiver::new(ChannelReceiver::Ordered(rx));
        let name: Arc<str> = Arc::from(FEEDBACK_CHANNEL);
        let cursor = FeedbackEvent::Cursor {
            position: NormalizedPoint::new(0.25, 0.75),
            visible: true,
        };
        tx.send(Message::new(name.clone(), 0, Bytes::from_static(b"\x09\x09")))
            .await
            .unwrap();
        tx.send(Message::new(name, 1, Bytes::from(cursor.to_bytes().unwrap())))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(receiver.recv().await, Some(cursor));
        assert_eq!(receiver.recv().await, None);
    }
}
