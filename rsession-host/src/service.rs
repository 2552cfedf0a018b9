//! Session host core logic.
//!
//! Listens for viewers and serves one at a time: frames from the
//! configured source go out on `rs.framebuffer`, input arriving on
//! `rs.input` is replayed into the injector, and the applied pointer
//! position is echoed back on `rs.feedback`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rsession_core::input::{
    FeedbackEvent, FeedbackSender, InputPlayback, NormalizedPoint, PlaybackStats,
};
use rsession_core::stream::{FrameSource, FrameStreamer, StreamEnd, encoder_for};
use rsession_core::{
    ChannelRegistry, CloseReason, FEEDBACK_CHANNEL, FRAMEBUFFER_CHANNEL, INPUT_CHANNEL, Session,
    SessionError,
};

use crate::config::HostConfig;
use crate::injector::WindowInjector;
use crate::source::TestPatternSource;

/// Builds a fresh frame source for each viewer.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// How one hosted session went.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub reason: CloseReason,
    pub stream_end: Option<StreamEnd>,
    pub input: PlaybackStats,
}

// ── HostService ──────────────────────────────────────────────────

pub struct HostService {
    config: HostConfig,
    source: SourceFactory,
    cancel: CancellationToken,
    reports: watch::Sender<Option<SessionReport>>,
}

impl HostService {
    /// A host streaming the built-in test pattern.
    pub fn new(config: HostConfig) -> Self {
        let (width, height) = (config.stream.width, config.stream.height);
        let source: SourceFactory = Arc::new(move || {
            Box::new(TestPatternSource::new(width, height)) as Box<dyn FrameSource>
        });
        Self::with_source(config, source)
    }

    pub fn with_source(config: HostConfig, source: SourceFactory) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            config,
            source,
            cancel: CancellationToken::new(),
            reports,
        }
    }

    /// Token that stops the service when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// The most recent finished session.
    pub fn reports(&self) -> watch::Receiver<Option<SessionReport>> {
        self.reports.subscribe()
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), SessionError> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("session host listening on {addr}");
        self.serve(listener).await
    }

    /// Serve viewers from `listener`, one at a time, until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SessionError> {
        loop {
            let accept = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => result,
            };
            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            info!("viewer connected from {peer}");
            match self.host_session(stream, peer).await {
                Ok(report) => {
                    info!(
                        %peer,
                        reason = %report.reason,
                        input = ?report.input,
                        "session with viewer ended"
                    );
                    self.reports.send_replace(Some(report));
                }
                Err(e) if e.is_establishment_failure() => {
                    warn!("handshake with {peer} failed: {e}")
                }
                Err(e) => error!("session with {peer} failed: {e}"),
            }
        }

        info!("session host stopped");
        Ok(())
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn host_session(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<SessionReport, SessionError> {
        let mut session = Session::accept(
            stream,
            ChannelRegistry::host_defaults(),
            self.config.to_session_config(),
        )
        .await?;
        let caps = session.capabilities();
        info!(session = %session.session_id(), capabilities = ?caps, "hosting session");

        let frames = take_sender(&mut session, FRAMEBUFFER_CHANNEL)?;
        let feedback = take_sender(&mut session, FEEDBACK_CHANNEL)?;
        let input = session
            .take_receiver(INPUT_CHANNEL)
            .ok_or_else(|| SessionError::UnknownChannel(INPUT_CHANNEL.into()))?;
        let acks = session.take_acks().ok_or(SessionError::ChannelClosed)?;

        let cancel = self.cancel.child_token();

        let streamer = FrameStreamer::new(
            (self.source)(),
            encoder_for(caps),
            frames,
            acks,
            session.signals(),
            cancel.clone(),
            self.config.to_streamer_config(),
        );
        let streamer = tokio::spawn(streamer.run());

        let injector =
            WindowInjector::new(self.config.window_rect(), self.config.input.consume_input);
        let cursor = injector.cursor();
        let playback = InputPlayback::new(
            input,
            injector,
            session.watch_capabilities(),
            self.config.to_replay_config(),
            cancel.clone(),
        );
        let playback = tokio::spawn(playback.run());

        let feedback = FeedbackSender::new(feedback, session.watch_capabilities());
        let echo = spawn_cursor_echo(feedback, cursor, cancel.clone());

        let reason = tokio::select! {
            reason = session.closed() => reason,
            _ = self.cancel.cancelled() => session.close().await,
        };
        cancel.cancel();

        let stream_end = streamer.await.ok();
        let input = playback.await.unwrap_or_default();
        let _ = echo.await;
        Ok(SessionReport {
            peer,
            reason,
            stream_end,
            input,
        })
    }
}

fn take_sender(
    session: &mut Session,
    channel: &str,
) -> Result<rsession_core::ChannelSender, SessionError> {
    session
        .take_sender(channel)
        .ok_or_else(|| SessionError::UnknownChannel(channel.into()))
}

/// Mirror applied pointer positions to the viewer.
fn spawn_cursor_echo(
    mut feedback: FeedbackSender,
    mut cursor: watch::Receiver<Option<NormalizedPoint>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = cursor.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let current = *cursor.borrow_and_update();
            let Some(position) = current else {
                continue;
            };
            match feedback.send(FeedbackEvent::Cursor { position, visible: true }).await {
                Ok(_) => {}
                Err(e) => debug!("cursor feedback not sent: {e}"),
            }
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────
