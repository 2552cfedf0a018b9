//! Keep-alive probing and silence detection.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HeartbeatConfig;
use crate::message::ControlMessage;
use crate::mux::ControlSender;
use crate::network::Activity;
use crate::state::SessionSignal;

/// What the monitor concluded from one look at the activity clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pulse {
    Healthy,
    Silent,
    Lost,
}

pub(crate) fn classify(config: &HeartbeatConfig, since_recv: std::time::Duration) -> Pulse {
    if since_recv >= config.lost_after() {
        Pulse::Lost
    } else if since_recv >= config.degrade_after() {
        Pulse::Silent
    } else {
        Pulse::Healthy
    }
}

/// Runs until cancelled or the link is declared lost.
pub(crate) async fn run_heartbeat(
    activity: Arc<Activity>,
    config: HeartbeatConfig,
    control: ControlSender,
    signals: mpsc::Sender<SessionSignal>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut silent = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Ping whenever this side has been quiet, so the peer keeps
        // seeing traffic even when data only flows one way.
        if activity.since_sent() >= config.idle_interval
            && control.try_send(ControlMessage::KeepAlive)
        {
            debug!("keep-alive sent");
        }

        match classify(&config, activity.since_recv()) {
            Pulse::Lost => {
                warn!(silence = ?activity.since_recv(), "link lost");
                let _ = signals.send(SessionSignal::LinkLost).await;
                break;
            }
            Pulse::Silent if !silent => {
                silent = true;
                warn!(silence = ?activity.since_recv(), "peer silent");
                let _ = signals.send(SessionSignal::Silence).await;
            }
            Pulse::Healthy if silent => {
                silent = false;
                let _ = signals.send(SessionSignal::TrafficResumed).await;
            }
            _ => {}
        }
    }
}
