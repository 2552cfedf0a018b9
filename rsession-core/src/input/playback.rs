//! Host side of the input relay: `rs.input` → injection target.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::flags::Capabilities;
use crate::input::event::InputEvent;
use crate::mux::ChannelReceiver;

/// How far past `max_lag` an event may be scheduled ahead of now
/// before the schedule restarts from it.
pub const MAX_SCHEDULE_AHEAD: Duration = Duration::from_secs(1);

/// The injection collaborator.
///
/// Called once per event, in arrival order. A failed injection is not
/// retried.
pub trait InputInjector: Send {
    fn inject(&mut self, event: &InputEvent) -> Result<(), SessionError>;
}

/// How origin timestamps shape replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayTiming {
    /// Apply each event on arrival.
    Immediate,
    /// Keep the captured spacing between events. A burst that arrives
    /// late is spread out again; once replay trails its schedule by
    /// more than `max_lag` the schedule restarts from the current event.
    /// It also restarts when an event would wait longer than `max_lag`
    /// plus [`MAX_SCHEDULE_AHEAD`].
    Preserve { max_lag: Duration },
}

#[derive(Debug, Clone)]
pub struct InputReplayConfig {
    pub timing: ReplayTiming,
}

impl Default for InputReplayConfig {
    fn default() -> Self {
        Self {
            timing: ReplayTiming::Preserve {
                max_lag: Duration::from_millis(100),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub applied: u64,
    pub failed: u64,
    pub undecodable: u64,
    /// Device kind was not negotiated.
    pub unsupported: u64,
}

/// Anchors origin time to local time.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    origin_us: u64,
    local: Instant,
}

pub struct InputPlayback<I> {
    events: ChannelReceiver,
    injector: I,
    capabilities: watch::Receiver<Capabilities>,
    config: InputReplayConfig,
    cancel: CancellationToken,
    anchor: Option<Anchor>,
    stats: PlaybackStats,
}

impl<I: InputInjector> InputPlayback<I> {
    pub fn new(
        events: ChannelReceiver,
        injector: I,
        capabilities: watch::Receiver<Capabilities>,
        config: InputReplayConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            injector,
            capabilities,
            config,
            cancel,
            anchor: None,
            stats: PlaybackStats::default(),
        }
    }

    /// Runs until cancelled or the input channel closes.
    pub async fn run(mut self) -> PlaybackStats {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                msg = self.events.recv() => msg,
            };
            let Some(msg) = msg else {
                debug!("input channel closed");
                break;
            };

            let event = match InputEvent::from_bytes(msg.payload()) {
                Ok(event) => event,
                Err(e) => {
                    self.stats.undecodable += 1;
                    warn!(
                        sequence = msg.sequence(),
                        error = %e,
                        "dropping undecodable input event"
                    );
                    continue;
                }
            };

            let needed = event.required_capability();
            if !self.capabilities.borrow().contains(needed) {
                self.stats.unsupported += 1;
                warn!(device = ?event.device(), "input device not negotiated, event dropped");
                continue;
            }

            if let Some(deadline) = self.schedule(&event) {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }

            match self.injector.inject(&event) {
                Ok(()) => {
                    self.stats.applied += 1;
                    trace!(
                        sequence = msg.sequence(),
                        device = ?event.device(),
                        action = ?event.action,
                        "input applied"
                    );
                }
                Err(e) => {
                    self.stats.failed += 1;
                    warn!(
                        sequence = msg.sequence(),
                        error = %e,
                        "input injection failed, event dropped"
                    );
                }
            }
        }

        info!(stats = ?self.stats, "input playback stopped");
        self.stats
    }

    /// When `event` is due, or `None` for now.
    fn schedule(&mut self, event: &InputEvent) -> Option<Instant> {
        let ReplayTiming::Preserve { max_lag } = self.config.timing else {
            return None;
        };
        let now = Instant::now();
        let Some(anchor) = self.anchor else {
            self.anchor = Some(Anchor {
                origin_us: event.origin_us,
                local: now,
            });
            return None;
        };

        // Origin went backwards: a new capture on the peer.
        if event.origin_us < anchor.origin_us {
            self.anchor = Some(Anchor {
                origin_us: event.origin_us,
                local: now,
            });
            return None;
        }

        let offset = Duration::from_micros(event.origin_us - anchor.origin_us);
        let due = anchor.local + offset;
        if due > now {
            let ahead = due - now;
            if ahead <= max_lag + MAX_SCHEDULE_AHEAD {
                return Some(due);
            }
            warn!(?ahead, "input timestamp jumped ahead, re-anchoring");
            self.anchor = Some(Anchor {
                origin_us: event.origin_us,
                local: now,
            });
            return None;
        }
        if now - due > max_lag {
            trace!(lag = ?(now - due), "replay fell behind, re-anchoring");
            self.anchor = Some(Anchor {
                origin_us: event.origin_us,
                local: now,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::input::event::{InputAction, NormalizedPoint, PointerButton};
    use crate::message::Message;

    #[derive(Clone, Default)]
    struct Recorder {
        applied: Arc<Mutex<Vec<(InputAction, u64)>>>,
        fail_on: Option<u64>,
    }

    impl InputInjector for Recorder {
        fn inject(&mut self, event: &InputEvent) -> Result<(), SessionError> {
            if self.fail_on == Some(event.origin_us) {
                return Err(SessionError::Inject("target not focused".into()));
            }
            self.applied.lock().unwrap().push((event.action, event.origin_us));
            Ok(())
        }
    }

    fn message(seq: u64, event: InputEvent) -> Message {
        Message::new(Arc::from("rs.input"), seq, Bytes::from(event.to_bytes().unwrap()))
    }

    fn tap(action: InputAction, origin_us: u64) -> InputEvent {
        let center = NormalizedPoint::new(0.5, 0.5);
        let mut e = InputEvent::pointer(center, PointerButton::Left, action);
        e.origin_us = origin_us;
        e
    }

    fn playback(
        rx: mpsc::Receiver<Message>,
        recorder: Recorder,
        caps: Capabilities,
        timing: ReplayTiming,
    ) -> (InputPlayback<Recorder>, watch::Sender<Capabilities>) {
        let (caps_tx, caps_rx) = watch::channel(caps);
        let p = InputPlayback::new(
            ChannelReceiver::Ordered(rx),
            recorder,
            caps_rx,
            InputReplayConfig { timing },
            CancellationToken::new(),
        );
        (p, caps_tx)
    }

    #[tokio::test]
    async fn failures_are_dropped_and_later_events_still_apply() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Recorder {
            fail_on: Some(2),
            ..Default::default()
        };
        let applied = Arc::clone(&recorder.applied);
        let (p, _caps) = playback(rx, recorder, Capabilities::default(), ReplayTiming::Immediate);

        tx.send(message(0, tap(InputAction::Down, 1))).await.unwrap();
        tx.send(message(1, tap(InputAction::Move, 2))).await.unwrap();
        tx.send(message(2, tap(InputAction::Up, 3))).await.unwrap();
        drop(tx);

        let stats = p.run().await;
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            *applied.lock().unwrap(),
            vec![(InputAction::Down, 1), (InputAction::Up, 3)]
        );
    }

    #[tokio::test]
    async fn unnegotiated_devices_and_garbage_are_dropped() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Recorder::default();
        let applied = Arc::clone(&recorder.applied);
        let (p, _caps) = playback(rx, recorder, Capabilities::KEYBOARD, ReplayTiming::Immediate);

        tx.send(message(0, tap(InputAction::Down, 1))).await.unwrap();
        tx.send(Message::new(Arc::from("rs.input"), 1, Bytes::from_static(b"\xff")))
            .await
            .unwrap();
        let mut key = InputEvent::key(13, None, InputAction::Down);
        key.origin_us = 5;
        tx.send(message(2, key)).await.unwrap();
        drop(tx);

        let stats = p.run().await;
        assert_eq!(stats.unsupported, 1);
        assert_eq!(stats.undecodable, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(*applied.lock().unwrap(), vec![(InputAction::Down, 5)]);
    }

    #[tokio::test]
    async fn preserve_keeps_captured_spacing() {
        let (tx, rx) = mpsc::channel(8);
        let (p, _caps) = playback(
            rx,
            Recorder::default(),
            Capabilities::default(),
            ReplayTiming::Preserve {
                max_lag: Duration::from_secs(1),
            },
        );

        // Arrive together, captured 60 ms apart.
        tx.send(message(0, tap(InputAction::Down, 0))).await.unwrap();
        tx.send(message(1, tap(InputAction::Up, 60_000))).await.unwrap();
        drop(tx);

        let started = std::time::Instant::now();
        let stats = p.run().await;
        assert_eq!(stats.applied, 2);
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn immediate_does_not_wait() {
        let (tx, rx) = mpsc::channel(8);
        let (p, _caps) = playback(
            rx,
            Recorder::default(),
            Capabilities::default(),
            ReplayTiming::Immediate,
        );
        tx.send(message(0, tap(InputAction::Down, 0))).await.unwrap();
        tx.send(message(1, tap(InputAction::Up, 5_000_000))).await.unwrap();
        drop(tx);

        let started = std::time::Instant::now();
        p.run().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn preserve_does_not_stall_on_a_timestamp_jump() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Recorder::default();
        let applied = Arc::clone(&recorder.applied);
        let (p, _caps) = playback(
            rx,
            recorder,
            Capabilities::default(),
            ReplayTiming::Preserve {
                max_lag: Duration::from_millis(100),
            },
        );

        // An hour ahead of the first event, then normal spacing again.
        let hour_us = 3_600_000_000;
        tx.send(message(0, tap(InputAction::Down, 0))).await.unwrap();
        tx.send(message(1, tap(InputAction::Move, hour_us))).await.unwrap();
        tx.send(message(2, tap(InputAction::Up, hour_us + 40_000))).await.unwrap();
        drop(tx);

        let started = std::time::Instant::now();
        let stats = tokio::time::timeout(Duration::from_secs(5), p.run()).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(stats.applied, 3);
        assert!(elapsed >= Duration::from_millis(35));
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(applied.lock().unwrap().last(), Some(&(InputAction::Up, hour_us + 40_000)));
    }
}
