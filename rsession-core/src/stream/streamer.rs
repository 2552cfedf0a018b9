//! Host-side capture loop: source → scheduler → encoder → `rs.framebuffer`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::SessionError;
use crate::mux::{ChannelSender, SendOutcome};
use crate::state::SessionSignal;
use crate::stream::encoder::{EncodedImage, FrameEncoder, QualityStep};
use crate::stream::scheduler::{
    Escalation, FrameScheduler, SchedulerConfig, SchedulerStats, SkipReason, TickDecision,
};
use crate::stream::types::RawFrame;

/// The rendering collaborator.
#[async_trait]
pub trait FrameSource: Send {
    /// Grab the current framebuffer. `Ok(None)` means the source has
    /// nothing more to give and streaming should stop.
    async fn capture(&mut self) -> Result<Option<RawFrame>, SessionError>;
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn capture(&mut self) -> Result<Option<RawFrame>, SessionError> {
        (**self).capture().await
    }
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub scheduler: SchedulerConfig,
    /// Bound on a single capture call.
    pub capture_timeout: Duration,
    /// Consecutive capture/encode failures before the session is failed.
    pub max_consecutive_failures: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            capture_timeout: Duration::from_secs(1),
            max_consecutive_failures: 5,
        }
    }
}

/// Published after every tick that changed something.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub scheduler: SchedulerStats,
    pub encode_failures: u64,
    pub bytes_sent: u64,
    pub quality: u8,
    pub downscale: u32,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    SourceFinished,
    SessionEnded,
    Failed,
}

pub struct FrameStreamer<S> {
    source: S,
    scheduler: FrameScheduler,
    encoder: Arc<dyn FrameEncoder>,
    frames: ChannelSender,
    acks: mpsc::Receiver<u64>,
    signals: mpsc::Sender<SessionSignal>,
    cancel: CancellationToken,
    config: StreamerConfig,
    epoch: Instant,
    failures: u32,
    stats: StreamStats,
    stats_tx: watch::Sender<StreamStats>,
}

impl<S: FrameSource> FrameStreamer<S> {
    pub fn new(
        source: S,
        encoder: Arc<dyn FrameEncoder>,
        frames: ChannelSender,
        acks: mpsc::Receiver<u64>,
        signals: mpsc::Sender<SessionSignal>,
        cancel: CancellationToken,
        config: StreamerConfig,
    ) -> Self {
        let scheduler = FrameScheduler::new(config.scheduler.clone());
        let (stats_tx, _) = watch::channel(StreamStats::default());
        Self {
            source,
            scheduler,
            encoder,
            frames,
            acks,
            signals,
            cancel,
            config,
            epoch: Instant::now(),
            failures: 0,
            stats: StreamStats::default(),
            stats_tx,
        }
    }

    /// Subscribe to streaming statistics.
    pub fn stats(&self) -> watch::Receiver<StreamStats> {
        self.stats_tx.subscribe()
    }

    pub async fn run(mut self) -> StreamEnd {
        let mut ticker = tokio::time::interval(self.scheduler.config().frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            fps = self.scheduler.config().fps,
            codec = ?self.encoder.codec(),
            step = ?self.scheduler.current_step(),
            "frame streaming started"
        );

        let end = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StreamEnd::Cancelled,
                ack = self.acks.recv() => match ack {
                    Some(index) => {
                        let escalation = self.scheduler.on_ack(index, Instant::now());
                        self.escalate(escalation).await;
                    }
                    None => break StreamEnd::SessionEnded,
                },
                _ = ticker.tick() => {
                    if let Some(end) = self.tick().await {
                        break end;
                    }
                }
            }
        };

        self.publish();
        info!(?end, stats = ?self.stats, "frame streaming stopped");
        end
    }

    async fn escalate(&mut self, escalation: Option<Escalation>) {
        let signal = match escalation {
            Some(Escalation::Congested) => SessionSignal::Congested,
            Some(Escalation::Recovered) => SessionSignal::Recovered,
            None => return,
        };
        let _ = self.signals.send(signal).await;
    }

    fn publish(&mut self) {
        let step = self.scheduler.current_step();
        self.stats.scheduler = self.scheduler.stats();
        self.stats.quality = step.quality;
        self.stats.downscale = step.downscale;
        self.stats_tx.send_replace(self.stats);
    }

    async fn tick(&mut self) -> Option<StreamEnd> {
        let now = Instant::now();
        let escalation = self.scheduler.check_timeout(now);
        self.escalate(escalation).await;

        let (index, step) = match self.scheduler.next_frame(now) {
            TickDecision::Send { index, step } => (index, step),
            TickDecision::Skip(SkipReason::AwaitingAck) => {
                trace!(in_flight = ?self.scheduler.in_flight(), "waiting for ack");
                return None;
            }
            TickDecision::Skip(SkipReason::RateLimited) => return None,
        };

        let captured = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Some(StreamEnd::Cancelled),
            r = tokio::time::timeout(self.config.capture_timeout, self.source.capture()) => r,
        };
        let frame = match captured {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return Some(StreamEnd::SourceFinished),
            Ok(Err(e)) => return self.fail(index, e).await,
            Err(_) => {
                let timeout = SessionError::Timeout(self.config.capture_timeout);
                return self.fail(index, timeout).await;
            }
        };

        let capture_us = frame
            .timestamp
            .saturating_duration_since(self.epoch)
            .as_micros() as u64;
        let encoded = match self.encode(frame, step).await {
            Ok((image, frame)) => image.into_frame(index, capture_us, &frame),
            Err(e) => return self.fail(index, e).await,
        };
        let payload = match encoded.to_bytes() {
            Ok(p) => p,
            Err(e) => return self.fail(index, e).await,
        };
        let size = payload.len();

        match self.frames.send(payload).await {
            Ok(SendOutcome::Queued(_)) => {
                self.failures = 0;
                self.stats.bytes_sent += size as u64;
                trace!(index, size, quality = step.quality, "frame sent");
            }
            Ok(SendOutcome::Shed(_)) => self.scheduler.cancel(index),
            Ok(SendOutcome::Inactive) => return Some(StreamEnd::SessionEnded),
            Err(e) => return self.fail(index, e).await,
        }
        self.publish();
        None
    }

    /// Encode off the async runtime; the frame comes back for its metadata.
    fn encode(
        &self,
        frame: RawFrame,
        step: QualityStep,
    ) -> impl std::future::Future<Output = Result<(EncodedImage, RawFrame), SessionError>>
           + Send
           + 'static {
        let encoder = Arc::clone(&self.encoder);
        async move {
            tokio::task::spawn_blocking(move || {
                let image = encoder.encode(&frame, step)?;
                Ok((image, frame))
            })
            .await
            .map_err(|e| SessionError::Encode(format!("encoder task failed: {e}")))?
        }
    }

    async fn fail(&mut self, index: u64, err: SessionError) -> Option<StreamEnd> {
        self.scheduler.cancel(index);
        self.failures += 1;
        self.stats.encode_failures += 1;
        warn!(index, error = %err, failures = self.failures, "dropping frame");

        if self.failures >= self.config.max_consecutive_failures.max(1) {
            error!(failures = self.failures, "frame pipeline keeps failing");
            let _ = self
                .signals
                .send(SessionSignal::Fatal(format!("frame pipeline failed: {err}")))
                .await;
            return Some(StreamEnd::Failed);
        }
        debug!("continuing after frame failure");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryMode, FRAMEBUFFER_CHANNEL};
    use crate::mux::{ChannelRole, ChannelSpec, Outbound};
    use crate::state::SessionState;
    use crate::stream::encoder::ZstdFrameEncoder;
    use crate::stream::types::{EncodedFrame, PixelFormat};

    struct Counting {
        left: usize,
    }

    #[async_trait]
    impl FrameSource for Counting {
        async fn capture(&mut self) -> Result<Option<RawFrame>, SessionError> {
            if self.left == 0 {
                return Ok(None);
            }
            self.left -= 1;
            Ok(Some(RawFrame::packed(4, 4, PixelFormat::Rgb8, vec![7; 48])))
        }
    }

    struct Broken;

    #[async_trait]
    impl FrameSource for Broken {
        async fn capture(&mut self) -> Result<Option<RawFrame>, SessionError> {
            Ok(Some(RawFrame::packed(0, 0, PixelFormat::Rgb8, Vec::new())))
        }
    }

    struct Rig {
        outbound: mpsc::Receiver<Outbound>,
        acks: mpsc::Sender<u64>,
        signals: mpsc::Receiver<SessionSignal>,
        _state: watch::Sender<SessionState>,
    }

    fn streamer<S: FrameSource>(source: S, config: StreamerConfig) -> (FrameStreamer<S>, Rig) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(SessionState::Active);
        let (ack_tx, ack_rx) = mpsc::channel(8);
        let (sig_tx, sig_rx) = mpsc::channel(8);
        let spec = ChannelSpec::new(
            FRAMEBUFFER_CHANNEL,
            DeliveryMode::BestEffortLatest,
            ChannelRole::Send,
        );
        let sender = ChannelSender::new(spec, 1 << 20, out_tx, state_rx);
        let s = FrameStreamer::new(
            source,
            Arc::new(ZstdFrameEncoder),
            sender,
            ack_rx,
            sig_tx,
            CancellationToken::new(),
            config,
        );
        let rig = Rig {
            outbound: out_rx,
            acks: ack_tx,
            signals: sig_rx,
            _state: state_tx,
        };
        (s, rig)
    }

    fn fast() -> StreamerConfig {
        StreamerConfig {
            scheduler: SchedulerConfig {
                fps: 200,
                ..SchedulerConfig::default()
            },
            capture_timeout: Duration::from_millis(200),
            max_consecutive_failures: 3,
        }
    }

    #[tokio::test]
    async fn waits_for_ack_before_next_frame() {
        let (s, mut rig) = streamer(Counting { left: 2 }, fast());
        let task = tokio::spawn(s.run());

        let first = rig.outbound.recv().await.unwrap();
        let frame = EncodedFrame::from_bytes(first.message.payload()).unwrap();
        assert_eq!(frame.index, 0);

        // Nothing else goes out until the ack arrives.
        let early = tokio::time::timeout(Duration::from_millis(50), rig.outbound.recv()).await;
        assert!(early.is_err());

        rig.acks.send(0).await.unwrap();
        let second = rig.outbound.recv().await.unwrap();
        assert_eq!(EncodedFrame::from_bytes(second.message.payload()).unwrap().index, 1);
        rig.acks.send(1).await.unwrap();

        assert_eq!(task.await.unwrap(), StreamEnd::SourceFinished);
    }

    #[tokio::test]
    async fn repeated_encode_failures_are_fatal() {
        let (s, mut rig) = streamer(Broken, fast());
        assert_eq!(s.run().await, StreamEnd::Failed);
        assert!(matches!(rig.signals.recv().await, Some(SessionSignal::Fatal(_))));
        assert!(rig.outbound.try_recv().is_err());
    }
}
