//! Ack-paced frame scheduling.
//!
//! Pure decision logic; every method takes the current [`Instant`] so
//! the pacing can be driven by a real clock or by tests.
//!
//! At most one frame is in flight: a new frame is only produced once
//! the previous one was acknowledged or abandoned after `ack_timeout`.
//! Ack latency feeds an EWMA that walks a quality ladder down (above
//! the high-water mark) or up (below the low-water mark for a sustained
//! window). Repeated ack timeouts drop straight to the lowest rung and,
//! after `timeouts_to_degrade` in a row, report congestion.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::stream::encoder::{QualityStep, closest_step, default_ladder};
use crate::stream::latency::LatencyEstimator;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capture ceiling in frames per second.
    pub fps: u32,
    /// Starting quality (1..=100); mapped to the closest ladder rung.
    pub initial_quality: u8,
    /// Best first, worst last. Must not be empty.
    pub ladder: Vec<QualityStep>,
    /// Step down when the smoothed ack latency exceeds this.
    pub high_water: Duration,
    /// Step up when it stays below this for `sustain`.
    pub low_water: Duration,
    pub sustain: Duration,
    /// Minimum spacing between latency-driven step changes.
    pub step_cooldown: Duration,
    /// An in-flight frame is abandoned after this long without an ack.
    pub ack_timeout: Duration,
    /// Consecutive abandoned frames that make up one ack timeout.
    pub missed_acks_per_timeout: u32,
    /// Consecutive ack timeouts that escalate to the session.
    pub timeouts_to_degrade: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            initial_quality: 80,
            ladder: default_ladder(),
            high_water: Duration::from_millis(150),
            low_water: Duration::from_millis(50),
            sustain: Duration::from_secs(2),
            step_cooldown: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(1),
            missed_acks_per_timeout: 1,
            timeouts_to_degrade: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// What to do on a capture tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Capture, encode at `step` and send as frame `index`.
    Send { index: u64, step: QualityStep },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Too soon after the previous frame for the fps ceiling.
    RateLimited,
    /// The previous frame has not been acknowledged yet.
    AwaitingAck,
}

/// Changes the session state machine must hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Congested,
    Recovered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub sent: u64,
    pub acked: u64,
    pub rate_limited: u64,
    pub awaiting_ack: u64,
    pub abandoned: u64,
    pub ack_timeouts: u64,
    pub stale_acks: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    index: u64,
    sent_at: Instant,
}

#[derive(Debug)]
pub struct FrameScheduler {
    config: SchedulerConfig,
    latency: LatencyEstimator,
    step: usize,
    next_index: u64,
    in_flight: Option<InFlight>,
    last_send: Option<Instant>,
    last_step_change: Option<Instant>,
    calm_since: Option<Instant>,
    missed: u32,
    consecutive_timeouts: u32,
    congested: bool,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(mut config: SchedulerConfig) -> Self {
        if config.ladder.is_empty() {
            config.ladder = default_ladder();
        }
        let step = closest_step(&config.ladder, config.initial_quality);
        Self {
            config,
            latency: LatencyEstimator::new(),
            step,
            next_index: 0,
            in_flight: None,
            last_send: None,
            last_step_change: None,
            calm_since: None,
            missed: 0,
            consecutive_timeouts: 0,
            congested: false,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn current_step(&self) -> QualityStep {
        self.config.ladder[self.step]
    }

    pub fn is_min_quality(&self) -> bool {
        self.step + 1 == self.config.ladder.len()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.map(|f| f.index)
    }

    pub fn is_congested(&self) -> bool {
        self.congested
    }

    pub fn average_latency(&self) -> Option<Duration> {
        self.latency.average()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    // ── Tick ─────────────────────────────────────────────────────

    /// Abandon the in-flight frame if its ack is overdue.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Escalation> {
        let flight = self.in_flight?;
        if now.saturating_duration_since(flight.sent_at) < self.config.ack_timeout {
            return None;
        }

        self.in_flight = None;
        self.stats.abandoned += 1;
        self.missed += 1;
        debug!(index = flight.index, missed = self.missed, "frame ack overdue, abandoning");

        if self.missed < self.config.missed_acks_per_timeout.max(1) {
            return None;
        }
        self.missed = 0;
        self.register_timeout(now)
    }

    fn register_timeout(&mut self, now: Instant) -> Option<Escalation> {
        self.consecutive_timeouts += 1;
        self.stats.ack_timeouts += 1;
        let floor = self.config.ladder.len() - 1;
        if self.step != floor {
            self.step = floor;
            self.last_step_change = Some(now);
            warn!(step = ?self.current_step(), "ack timeout, dropping to minimum quality");
        }
        self.calm_since = None;

        if self.consecutive_timeouts >= self.config.timeouts_to_degrade.max(1) && !self.congested {
            self.congested = true;
            warn!(timeouts = self.consecutive_timeouts, "sustained congestion");
            return Some(Escalation::Congested);
        }
        None
    }

    /// Decide whether this tick produces a frame.
    pub fn next_frame(&mut self, now: Instant) -> TickDecision {
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.config.frame_interval() {
                self.stats.rate_limited += 1;
                return TickDecision::Skip(SkipReason::RateLimited);
            }
        }
        if self.in_flight.is_some() {
            self.stats.awaiting_ack += 1;
            return TickDecision::Skip(SkipReason::AwaitingAck);
        }

        let index = self.next_index;
        self.next_index += 1;
        self.in_flight = Some(InFlight { index, sent_at: now });
        self.last_send = Some(now);
        self.stats.sent += 1;
        TickDecision::Send {
            index,
            step: self.current_step(),
        }
    }

    /// Forget frame `index` without counting it as a timeout (capture or
    /// encode failed, or the send was shed).
    pub fn cancel(&mut self, index: u64) {
        if self.in_flight.is_some_and(|f| f.index == index) {
            self.in_flight = None;
            self.stats.sent = self.stats.sent.saturating_sub(1);
        }
    }

    // ── Feedback ─────────────────────────────────────────────────

    pub fn on_ack(&mut self, index: u64, now: Instant) -> Option<Escalation> {
        let Some(flight) = self.in_flight.filter(|f| f.index == index) else {
            self.stats.stale_acks += 1;
            debug!(index, "ack for a frame no longer in flight");
            return None;
        };

        self.in_flight = None;
        self.stats.acked += 1;
        self.missed = 0;
        self.consecutive_timeouts = 0;
        self.latency.record(now.saturating_duration_since(flight.sent_at));
        self.adapt(now);

        if self.congested {
            self.congested = false;
            info!("acks flowing again");
            return Some(Escalation::Recovered);
        }
        None
    }

    fn cooled_down(&self, now: Instant) -> bool {
        self.last_step_change
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.step_cooldown)
    }

    fn adapt(&mut self, now: Instant) {
        let Some(avg) = self.latency.average() else {
            return;
        };

        if avg > self.config.high_water {
            self.calm_since = None;
            if !self.is_min_quality() && self.cooled_down(now) {
                self.step += 1;
                self.last_step_change = Some(now);
                info!(latency = ?avg, step = ?self.current_step(), "quality down");
            }
        } else if avg < self.config.low_water {
            let since = *self.calm_since.get_or_insert(now);
            if self.step > 0
                && now.saturating_duration_since(since) >= self.config.sustain
                && self.cooled_down(now)
            {
                self.step -= 1;
                self.last_step_change = Some(now);
                self.calm_since = Some(now);
                info!(latency = ?avg, step = ?self.current_step(), "quality up");
            }
        } else {
            self.calm_since = None;
        }
    }
}
