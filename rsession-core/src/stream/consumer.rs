//! Viewer-side frame loop: `rs.framebuffer` → decoder → display → ack.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::mux::{ChannelReceiver, ControlSender};
use crate::stream::decoder::FrameDecoder;
use crate::stream::types::DecodedFrame;

/// The display collaborator.
#[async_trait]
pub trait DisplaySink: Send {
    /// Show `frame`; resolve once it has been rendered. On error the
    /// previously shown frame must stay visible.
    async fn present(&mut self, frame: DecodedFrame) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub displayed: u64,
    pub decode_failures: u64,
    pub present_failures: u64,
    pub last_index: Option<u64>,
}

pub struct FrameConsumer<D> {
    frames: ChannelReceiver,
    acks: ControlSender,
    display: D,
    decoder: FrameDecoder,
    cancel: CancellationToken,
    stats: ConsumerStats,
}

impl<D: DisplaySink> FrameConsumer<D> {
    pub fn new(
        frames: ChannelReceiver,
        acks: ControlSender,
        display: D,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            frames,
            acks,
            display,
            decoder: FrameDecoder::new(),
            cancel,
            stats: ConsumerStats::default(),
        }
    }

    /// Runs until cancelled or the session stops delivering frames.
    pub async fn run(mut self) -> ConsumerStats {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                msg = self.frames.recv() => msg,
            };
            let Some(msg) = msg else {
                debug!("frame channel closed");
                break;
            };

            let decoder = self.decoder;
            let payload = msg.into_payload();
            let decoded = tokio::task::spawn_blocking(move || decoder.decode_payload(&payload))
                .await
                .map_err(|e| SessionError::Decode(format!("decoder task failed: {e}")))
                .and_then(|r| r);

            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.decode_failures += 1;
                    warn!(error = %e, "dropping undecodable frame");
                    continue;
                }
            };

            let index = frame.index;
            if let Err(e) = self.display.present(frame).await {
                self.stats.present_failures += 1;
                warn!(index, error = %e, "display rejected frame");
                continue;
            }

            self.stats.displayed += 1;
            self.stats.last_index = Some(index);
            trace!(index, "frame displayed");
            if !self.acks.ack_frame(index).await {
                debug!(index, "session no longer active, ack not sent");
            }
        }

        info!(stats = ?self.stats, "frame consumer stopped");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::message::{ControlMessage, Message};
    use crate::state::SessionState;
    use crate::stream::encoder::{FrameEncoder, QualityStep, ZstdFrameEncoder};
    use crate::stream::types::{PixelFormat, RawFrame};

    #[derive(Default)]
    struct Recorder {
        shown: Vec<u64>,
        fail_next: bool,
    }

    #[async_trait]
    impl DisplaySink for Recorder {
        async fn present(&mut self, frame: DecodedFrame) -> Result<(), SessionError> {
            if std::mem::take(&mut self.fail_next) {
                return Err(SessionError::Other("not visible".into()));
            }
            self.shown.push(frame.index);
            Ok(())
        }
    }

    fn payload(index: u64) -> Bytes {
        let raw = RawFrame::packed(2, 2, PixelFormat::Rgb8, vec![1; 12]);
        ZstdFrameEncoder
            .encode(&raw, QualityStep::new(90, 1))
            .unwrap()
            .into_frame(index, 0, &raw)
            .to_bytes()
            .unwrap()
    }

    #[tokio::test]
    async fn acks_only_frames_that_were_displayed() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (ctl_tx, mut ctl_rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(SessionState::Active);
        let consumer = FrameConsumer::new(
            ChannelReceiver::Ordered(frame_rx),
            ControlSender::new(ctl_tx, state_rx),
            Recorder::default(),
            CancellationToken::new(),
        );

        let fb: Arc<str> = Arc::from("rs.framebuffer");
        frame_tx.send(Message::new(fb.clone(), 0, payload(0))).await.unwrap();
        frame_tx.send(Message::new(fb.clone(), 1, Bytes::from_static(b"junk"))).await.unwrap();
        frame_tx.send(Message::new(fb.clone(), 2, payload(2))).await.unwrap();
        drop(frame_tx);

        let stats = consumer.run().await;
        assert_eq!(stats.displayed, 2);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.last_index, Some(2));

        assert_eq!(ctl_rx.recv().await, Some(ControlMessage::FrameAck { frame_index: 0 }));
        assert_eq!(ctl_rx.recv().await, Some(ControlMessage::FrameAck { frame_index: 2 }));
    }

    #[tokio::test]
    async fn present_failure_is_not_acked() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (ctl_tx, mut ctl_rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(SessionState::Active);
        let consumer = FrameConsumer::new(
            ChannelReceiver::Ordered(frame_rx),
            ControlSender::new(ctl_tx, state_rx),
            Recorder {
                fail_next: true,
                ..Default::default()
            },
            CancellationToken::new(),
        );
        frame_tx
            .send(Message::new(Arc::from("rs.framebuffer"), 0, payload(0)))
            .await
            .unwrap();
        drop(frame_tx);

        let stats = consumer.run().await;
        assert_eq!(stats.present_failures, 1);
        assert!(ctl_rx.try_recv().is_err());
    }
}
