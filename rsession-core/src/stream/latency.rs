//! Smoothed ack round-trip latency.

use std::time::Duration;

/// Exponentially weighted moving average of ack latency
/// (α = 1/8, the classic smoothed-RTT weight).
#[derive(Debug, Clone, Default)]
pub struct LatencyEstimator {
    /// Smoothed latency in microseconds; `None` until the first sample.
    smoothed_us: Option<u64>,
    samples: u64,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: Duration) {
        let sample_us = sample.as_micros() as u64;
        self.smoothed_us = Some(match self.smoothed_us {
            None => sample_us,
            // srtt = 7/8 * srtt + 1/8 * sample
            Some(srtt) => srtt * 7 / 8 + sample_us / 8,
        });
        self.samples += 1;
    }

    /// Smoothed latency, or `None` before any sample.
    pub fn average(&self) -> Option<Duration> {
        self.smoothed_us.map(Duration::from_micros)
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
