use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Anomaly counters reported while tracking a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerMetric {
    StateCollisionFromSource,
    UnknownStateFromDestination,
    ChecksumMismatch,
    StatusUpdateFailure,
}

impl TrackerMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerMetric::StateCollisionFromSource => "state_error_collision_from_source",
            TrackerMetric::UnknownStateFromDestination => "state_error_unknown_from_destination",
            TrackerMetric::ChecksumMismatch => "state_checksum_mismatch",
            TrackerMetric::StatusUpdateFailure => "stream_status_update_failure",
        }
    }
}

/// Sink for anomaly counters. Implementations must be cheap and non-blocking:
/// they are called from the record-processing path.
pub trait MetricClient: Send + Sync {
    fn count(&self, metric: TrackerMetric, value: u64);
}

#[derive(Debug, Default)]
struct InnerMetrics {
    state_collisions_from_source: AtomicU64,
    unknown_states_from_destination: AtomicU64,
    checksum_mismatches: AtomicU64,
    status_update_failures: AtomicU64,
}

/// In-process [`MetricClient`] backed by atomic counters.
#[derive(Debug, Clone)]
pub struct TrackerMetrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerMetricsSnapshot {
    pub state_collisions_from_source: u64,
    pub unknown_states_from_destination: u64,
    pub checksum_mismatches: u64,
    pub status_update_failures: u64,
}

impl TrackerMetrics {
    pub fn new() -> Self {
        TrackerMetrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    fn counter(&self, metric: TrackerMetric) -> &AtomicU64 {
        match metric {
            TrackerMetric::StateCollisionFromSource => &self.inner.state_collisions_from_source,
            TrackerMetric::UnknownStateFromDestination => {
                &self.inner.unknown_states_from_destination
            }
            TrackerMetric::ChecksumMismatch => &self.inner.checksum_mismatches,
            TrackerMetric::StatusUpdateFailure => &self.inner.status_update_failures,
        }
    }

    pub fn get(&self, metric: TrackerMetric) -> u64 {
        self.counter(metric).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TrackerMetricsSnapshot {
        TrackerMetricsSnapshot {
            state_collisions_from_source: self
                .inner
                .state_collisions_from_source
                .load(Ordering::Relaxed),
            unknown_states_from_destination: self
                .inner
                .unknown_states_from_destination
                .load(Ordering::Relaxed),
            checksum_mismatches: self.inner.checksum_mismatches.load(Ordering::Relaxed),
            status_update_failures: self.inner.status_update_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricClient for TrackerMetrics {
    fn count(&self, metric: TrackerMetric, value: u64) {
        self.counter(metric).fetch_add(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = TrackerMetrics::new();
        let other = metrics.clone();

        metrics.count(TrackerMetric::StateCollisionFromSource, 1);
        other.count(TrackerMetric::UnknownStateFromDestination, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.state_collisions_from_source, 1);
        assert_eq!(snapshot.unknown_states_from_destination, 2);
        assert_eq!(other.get(TrackerMetric::ChecksumMismatch), 0);
    }
}
