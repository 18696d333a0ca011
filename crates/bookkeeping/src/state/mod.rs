//! Checkpoint identity and the memory-bounded structures the sequential
//! strategy uses to attribute commits and timing.

pub mod delta_tracker;
pub mod fingerprint;
pub mod metrics_tracker;

pub use delta_tracker::{StateDeltaTracker, StreamDelta};
pub use fingerprint::Fingerprint;
pub use metrics_tracker::StateMetricsTracker;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Running max/mean over whole-second samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SecondsStat {
    samples: u64,
    max: u64,
    mean: f64,
}

impl SecondsStat {
    pub fn record(&mut self, seconds: u64) {
        self.max = self.max.max(seconds);
        self.mean = (self.mean * self.samples as f64 + seconds as f64) / (self.samples + 1) as f64;
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn max(&self) -> Option<u64> {
        (self.samples > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.mean)
    }
}

/// Whole seconds elapsed, clamped at zero for clocks that went backwards.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_seconds().max(0) as u64
}
