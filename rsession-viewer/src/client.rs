//! Viewer session loop.
//!
//! Connects to the host, shows frames from `rs.framebuffer` on the
//! headless display, forwards controller input on `rs.input` and
//! applies cursor feedback. When the session ends the client goes back
//! to connecting, until the controller quits or the client is stopped.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rsession_core::input::{FeedbackEvent, FeedbackReceiver, InputCapture, InputSender};
use rsession_core::stream::{ConsumerStats, FrameConsumer};
use rsession_core::{
    CloseReason, FEEDBACK_CHANNEL, FRAMEBUFFER_CHANNEL, INPUT_CHANNEL, Session, SessionError,
    SessionState,
};

use crate::config::ViewerConfig;
use crate::connection::connect_with_retry;
use crate::controller::Command;
use crate::display::{DisplayStatus, HeadlessDisplay};

/// Totals over every session the client ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sessions: u32,
    pub frames_displayed: u64,
    pub input_sent: u64,
    pub last_reason: Option<CloseReason>,
}

enum Exit {
    /// Host side or link ended the session; try again.
    Closed(CloseReason),
    /// Controller asked to quit.
    Quit(CloseReason),
    Stopped,
}

pub struct ViewerClient {
    config: ViewerConfig,
    display: HeadlessDisplay,
}

impl ViewerClient {
    pub fn new(config: ViewerConfig) -> Self {
        Self::with_display(config, HeadlessDisplay::new())
    }

    pub fn with_display(config: ViewerConfig, display: HeadlessDisplay) -> Self {
        Self { config, display }
    }

    /// Shared handle to the display the client renders into.
    pub fn display(&self) -> HeadlessDisplay {
        self.display.clone()
    }

    /// Connect and serve sessions until `quit`, `cancel`, or the
    /// reconnect policy gives up.
    pub async fn run(
        &self,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SessionError> {
        let address = self.config.address()?;
        let session_config = self.config.to_session_config();
        let policy = self.config.reconnect_policy();

        let mut summary = RunSummary::default();
        let mut commands_open = true;
        let result = loop {
            self.display.set_status(DisplayStatus::Connecting);
            let connected = connect_with_retry(&address, &session_config, policy, &cancel).await;
            let session = match connected {
                Ok(Some(session)) => session,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            summary.sessions += 1;

            let exit = self
                .run_session(session, &mut commands, &mut commands_open, &cancel, &mut summary)
                .await;
            self.display.set_status(DisplayStatus::Disconnected);
            match exit {
                Ok(Exit::Closed(reason)) => {
                    info!(%reason, "session ended, reconnecting");
                    summary.last_reason = Some(reason);
                }
                Ok(Exit::Quit(reason)) => {
                    summary.last_reason = Some(reason);
                    break Ok(());
                }
                Ok(Exit::Stopped) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.display.set_status(DisplayStatus::Disconnected);
        self.write_snapshot();
        info!(
            sessions = summary.sessions,
            frames = summary.frames_displayed,
            input = summary.input_sent,
            "viewer stopped"
        );
        result.map(|()| summary)
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn run_session(
        &self,
        mut session: Session,
        commands: &mut mpsc::Receiver<Command>,
        commands_open: &mut bool,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<Exit, SessionError> {
        info!(
            session = %session.session_id(),
            capabilities = ?session.capabilities(),
            "connected to host"
        );

        let frames = session
            .take_receiver(FRAMEBUFFER_CHANNEL)
            .ok_or_else(|| SessionError::UnknownChannel(FRAMEBUFFER_CHANNEL.into()))?;
        let feedback = session
            .take_receiver(FEEDBACK_CHANNEL)
            .ok_or_else(|| SessionError::UnknownChannel(FEEDBACK_CHANNEL.into()))?;
        let input = session
            .take_sender(INPUT_CHANNEL)
            .ok_or_else(|| SessionError::UnknownChannel(INPUT_CHANNEL.into()))?;

        let tasks = cancel.child_token();
        let status = spawn_status(session.watch_state(), self.display.clone(), tasks.clone());
        let consumer = FrameConsumer::new(
            frames,
            session.ack_sender(),
            self.display.clone(),
            tasks.clone(),
        );
        let consumer = tokio::spawn(consumer.run());
        let feedback = spawn_feedback(
            FeedbackReceiver::new(feedback),
            self.display.clone(),
            tasks.clone(),
        );

        let (mut feed, capture) = InputCapture::new();
        let forward = InputSender::new(input).forward(capture.capture(), tasks.clone());
        let forward = tokio::spawn(forward);

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    session.close().await;
                    break Some(Exit::Stopped);
                }
                reason = session.closed() => break Some(Exit::Closed(reason)),
                command = commands.recv(), if *commands_open => match command {
                    Some(Command::Quit) => break None,
                    Some(Command::Input(events)) => {
                        for (kind, action) in events {
                            if let Err(e) = feed.push(kind, action).await {
                                warn!("input dropped: {e}");
                                break;
                            }
                        }
                    }
                    None => {
                        debug!("controller gone, input disabled");
                        *commands_open = false;
                    }
                },
            }
        };

        // Queued input drains before a quit closes the session.
        drop(feed);
        let sent = forward.await.unwrap_or(0);
        let exit = match exit {
            Some(exit) => exit,
            None => Exit::Quit(session.close().await),
        };
        tasks.cancel();
        let stats: ConsumerStats = consumer.await.unwrap_or_default();
        let _ = feedback.await;
        let _ = status.await;

        summary.frames_displayed += stats.displayed;
        summary.input_sent += sent;
        debug!(?stats, sent, "session tasks finished");
        Ok(exit)
    }

    fn write_snapshot(&self) {
        let Some(path) = self.config.snapshot_path() else {
            return;
        };
        match self.display.write_snapshot(&path) {
            Ok(true) => {}
            Ok(false) => info!("no frame to snapshot"),
            Err(e) => warn!("snapshot failed: {e}"),
        }
    }
}

/// Mirror session state onto the display status.
fn spawn_status(
    mut state: watch::Receiver<SessionState>,
    display: HeadlessDisplay,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let current = *state.borrow_and_update();
            display.set_status(status_for(current));
            if current.is_terminal() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn status_for(state: SessionState) -> DisplayStatus {
    match state {
        SessionState::Active => DisplayStatus::Connected,
        SessionState::Degraded => DisplayStatus::Degraded,
        SessionState::Closing | SessionState::Closed => DisplayStatus::Disconnected,
        SessionState::Idle | SessionState::Connecting | SessionState::Handshaking => {
            DisplayStatus::Connecting
        }
    }
}

fn spawn_feedback(
    mut feedback: FeedbackReceiver,
    display: HeadlessDisplay,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                e = feedback.recv() => e,
            };
            match event {
                Some(FeedbackEvent::Cursor { position, visible }) => {
                    display.set_cursor(visible.then_some(position));
                }
                Some(FeedbackEvent::Haptic { intensity, duration_ms }) => {
                    debug!(intensity, duration_ms, "haptic feedback");
                }
                None => break,
            }
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_session_keeps_picture_with_status() {
        assert_eq!(status_for(SessionState::Degraded), DisplayStatus::Degraded);
        assert_eq!(status_for(SessionState::Active), DisplayStatus::Connected);
        assert_eq!(status_for(SessionState::Handshaking), DisplayStatus::Connecting);
        assert_eq!(status_for(SessionState::Closed), DisplayStatus::Disconnected);
    }

    #[tokio::test]
    async fn unparseable_address_fails_fast() {
        let mut config = ViewerConfig::default();
        config.network.host_address = "not a host:port:x".into();
        let client = ViewerClient::new(config);
        let (_tx, rx) = mpsc::channel(1);
        assert!(client.run(rx, CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn stopping_while_connecting_returns_empty_summary() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ViewerConfig::default();
        config.network.host_address = format!("127.0.0.1:{port}");
        config.network.retry_interval_ms = 20;
        let client = ViewerClient::new(config);
        let display = client.display();

        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::channel(1);
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let summary = client.run(rx, cancel).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(display.status(), DisplayStatus::Disconnected);
    }
}
