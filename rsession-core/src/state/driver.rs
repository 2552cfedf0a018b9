//! The task that owns a live session's state machine.
//!
//! Every component that needs to change the session's state sends a
//! [`SessionSignal`]; the driver is the single writer and publishes the
//! result over `watch` channels.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CloseReason;
use crate::flags::Capabilities;
use crate::message::ControlMessage;
use crate::mux::ControlSender;
use crate::state::session::{SessionState, SessionStateMachine};

/// Requests and observations that may change the session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// No inbound traffic for the degrade window.
    Silence,
    /// Inbound traffic seen again after [`Silence`](Self::Silence).
    TrafficResumed,
    /// The frame scheduler saw sustained ack timeouts.
    Congested,
    /// Acks are flowing again.
    Recovered,
    /// Silence outlasted the grace period.
    LinkLost,
    /// The peer said goodbye or ended the stream.
    PeerClosed { code: u8, detail: String },
    TransportError(String),
    ProtocolError(String),
    CloseRequested,
    /// A component cannot continue.
    Fatal(String),
    /// Renegotiation settled on a new capability set.
    CapabilitiesChanged(Capabilities),
}

pub(crate) struct SessionDriver {
    pub machine: SessionStateMachine,
    pub signals: mpsc::Receiver<SessionSignal>,
    pub state_tx: watch::Sender<SessionState>,
    pub caps_tx: watch::Sender<Capabilities>,
    pub closed_tx: watch::Sender<Option<CloseReason>>,
    pub control: ControlSender,
    pub cancel: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
    /// Per-task bound on releasing the link once closing starts.
    pub release_timeout: Duration,
    pub silent: bool,
    pub congested: bool,
}

impl SessionDriver {
    pub async fn run(mut self) {
        let reason = loop {
            match self.signals.recv().await {
                Some(signal) => {
                    if let Some(reason) = self.apply(signal) {
                        break reason;
                    }
                }
                None => break CloseReason::LocalClose,
            }
        };
        self.shutdown(reason).await;
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state());
    }

    /// Fold one signal into the state. Returns the close reason when
    /// the signal ends the session.
    fn apply(&mut self, signal: SessionSignal) -> Option<CloseReason> {
        debug!(?signal, state = %self.machine.state(), "session signal");
        match signal {
            SessionSignal::Silence => self.silent = true,
            SessionSignal::TrafficResumed => self.silent = false,
            SessionSignal::Congested => self.congested = true,
            SessionSignal::Recovered => self.congested = false,
            SessionSignal::CapabilitiesChanged(caps) => {
                info!(capabilities = ?caps, "capabilities renegotiated");
                self.caps_tx.send_replace(caps);
                return None;
            }
            SessionSignal::LinkLost => return Some(CloseReason::LinkLost),
            SessionSignal::PeerClosed { code, detail } => {
                info!(code, %detail, "peer closed the session");
                return Some(CloseReason::PeerClosed);
            }
            SessionSignal::TransportError(e) => return Some(CloseReason::Transport(e)),
            SessionSignal::ProtocolError(e) => return Some(CloseReason::Protocol(e)),
            SessionSignal::CloseRequested => return Some(CloseReason::LocalClose),
            SessionSignal::Fatal(e) => return Some(CloseReason::Fatal(e)),
        }
        self.reassess();
        None
    }

    /// Degraded while the link is silent or congested, Active otherwise.
    fn reassess(&mut self) {
        let troubled = self.silent || self.congested;
        let result = match (self.machine.state(), troubled) {
            (SessionState::Active, true) => self.machine.degrade(),
            (SessionState::Degraded, false) => self.machine.recover(),
            _ => return,
        };
        if let Err(e) = result {
            warn!(error = %e, "ignoring transition");
        }
        self.publish();
    }

    async fn shutdown(&mut self, reason: CloseReason) {
        if let Err(e) = self.machine.begin_close(reason.clone()) {
            warn!(error = %e, "unexpected state at close");
        }
        self.publish();

        let says_goodbye = !matches!(reason, CloseReason::PeerClosed | CloseReason::Transport(_));
        if says_goodbye {
            self.control.try_send(ControlMessage::Goodbye {
                code: reason.code(),
                detail: reason.to_string(),
            });
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.release_timeout, task).await.is_err() {
                warn!("I/O task ignored cancellation, aborting");
                abort.abort();
            }
        }

        if let Err(e) = self.machine.finish_close() {
            warn!(error = %e, "unexpected state at release");
        }
        info!(%reason, "session closed");
        self.closed_tx.send_replace(Some(reason));
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        signals: mpsc::Sender<SessionSignal>,
        state: watch::Receiver<SessionState>,
        closed: watch::Receiver<Option<CloseReason>>,
        control: mpsc::Receiver<ControlMessage>,
        handle: JoinHandle<()>,
    }

    fn spawn_driver() -> Harness {
        let mut machine = SessionStateMachine::new();
        machine.begin_connect().unwrap();
        machine.versions_agreed().unwrap();
        machine.capabilities_agreed().unwrap();

        let (sig_tx, sig_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(machine.state());
        let (caps_tx, _caps_rx) = watch::channel(Capabilities::default());
        let (closed_tx, closed_rx) = watch::channel(None);
        let (ctl_tx, ctl_rx) = mpsc::channel(8);

        let driver = SessionDriver {
            machine,
            signals: sig_rx,
            state_tx,
            caps_tx,
            closed_tx,
            control: ControlSender::new(ctl_tx, state_rx.clone()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            release_timeout: Duration::from_millis(100),
            silent: false,
            congested: false,
        };
        Harness {
            signals: sig_tx,
            state: state_rx,
            closed: closed_rx,
            control: ctl_rx,
            handle: tokio::spawn(driver.run()),
        }
    }

    async fn wait_for(state: &mut watch::Receiver<SessionState>, want: SessionState) {
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == want))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn silence_degrades_and_traffic_recovers() {
        let mut h = spawn_driver();
        h.signals.send(SessionSignal::Silence).await.unwrap();
        wait_for(&mut h.state, SessionState::Degraded).await;
        h.signals.send(SessionSignal::TrafficResumed).await.unwrap();
        wait_for(&mut h.state, SessionState::Active).await;
    }

    #[tokio::test]
    async fn recovery_waits_for_every_cause() {
        let mut h = spawn_driver();
        h.signals.send(SessionSignal::Silence).await.unwrap();
        h.signals.send(SessionSignal::Congested).await.unwrap();
        h.signals.send(SessionSignal::TrafficResumed).await.unwrap();
        wait_for(&mut h.state, SessionState::Degraded).await;
        h.signals.send(SessionSignal::Recovered).await.unwrap();
        wait_for(&mut h.state, SessionState::Active).await;
    }

    #[tokio::test]
    async fn local_close_says_goodbye_and_reports_reason_once() {
        let mut h = spawn_driver();
        h.signals.send(SessionSignal::CloseRequested).await.unwrap();
        wait_for(&mut h.state, SessionState::Closed).await;
        h.handle.await.unwrap();

        assert_eq!(*h.closed.borrow(), Some(CloseReason::LocalClose));
        assert!(matches!(h.control.try_recv(), Ok(ControlMessage::Goodbye { code: 0, .. })));
        // Driver is gone; further signals go nowhere.
        assert!(h.signals.send(SessionSignal::CloseRequested).await.is_err());
    }

    #[tokio::test]
    async fn link_lost_closes_with_reason() {
        let mut h = spawn_driver();
        h.signals.send(SessionSignal::LinkLost).await.unwrap();
        wait_for(&mut h.state, SessionState::Closed).await;
        assert_eq!(*h.closed.borrow(), Some(CloseReason::LinkLost));
    }
}
