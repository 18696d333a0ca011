//! Emitted, estimated and committed accounting for a sync attempt.

pub mod counters;
pub mod parallel;
pub mod sequential;
pub mod stream;

pub use counters::{CountersSnapshot, StatsCounters};
pub use parallel::ParallelStatsTracker;
pub use sequential::SequentialStatsTracker;
pub use stream::{StreamStatsSnapshot, StreamStatsTracker};

use crate::config::{BookkeepingConfig, StatsStrategy};
use crate::error::EstimateError;
use crate::metrics::MetricClient;
use model::core::identifiers::StreamKey;
use model::protocol::{EstimateTrace, RecordMessage, StateMessage};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Aggregated stats for the whole attempt or for one stream.
///
/// Optional fields are `None` when the value could not be computed
/// reliably; they are never reported as zero in that case.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub records_emitted: u64,
    pub bytes_emitted: u64,
    pub records_committed: Option<u64>,
    pub bytes_committed: Option<u64>,
    pub records_rejected: u64,
    pub estimated_records: Option<u64>,
    pub estimated_bytes: Option<u64>,
    pub source_state_messages_emitted: u64,
    pub destination_state_messages_emitted: u64,
    pub max_seconds_before_source_state_message_emitted: Option<u64>,
    pub mean_seconds_before_source_state_message_emitted: Option<f64>,
    pub max_seconds_between_state_message_emitted_and_committed: Option<u64>,
    pub mean_seconds_between_state_message_emitted_and_committed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSyncStats {
    pub stream_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_namespace: Option<String>,
    pub stats: SyncStats,
}

/// Routes record, checkpoint and estimate events to per-stream accounting.
///
/// Every method takes `&self`: implementations are shared between the
/// source and destination feeders of one attempt.
pub trait SyncStatsTracker: Send + Sync {
    fn update_stats(&self, record: &RecordMessage);

    fn update_estimates(&self, estimate: &EstimateTrace) -> Result<(), EstimateError>;

    fn update_source_states_stats(&self, state: &StateMessage);

    fn update_destination_state_stats(&self, state: &StateMessage);

    /// Every stream observed so far, including the unnamed key.
    fn stream_snapshots(&self) -> BTreeMap<StreamKey, StreamStatsSnapshot>;

    fn total_records_estimated(&self) -> Option<u64>;

    fn total_bytes_estimated(&self) -> Option<u64>;

    fn total_records_committed(&self) -> Option<u64>;

    fn total_bytes_committed(&self) -> Option<u64>;

    fn total_source_state_messages_emitted(&self) -> u64;

    fn total_destination_state_messages_emitted(&self) -> u64;

    fn max_seconds_to_receive_source_state_message(&self) -> Option<u64>;

    fn mean_seconds_to_receive_source_state_message(&self) -> Option<f64>;

    fn max_seconds_between_state_message_emitted_and_committed(&self) -> Option<u64>;

    fn mean_seconds_between_state_message_emitted_and_committed(&self) -> Option<f64>;

    fn unreliable_committed_counts(&self) -> bool;

    fn unreliable_state_timing_metrics(&self) -> bool;

    fn total_records_emitted(&self) -> u64 {
        self.stream_snapshots().values().map(|s| s.emitted.records).sum()
    }

    fn total_bytes_emitted(&self) -> u64 {
        self.stream_snapshots().values().map(|s| s.emitted.bytes).sum()
    }

    fn stream_to_emitted_records(&self) -> HashMap<StreamKey, u64> {
        named(self.stream_snapshots(), |s| Some(s.emitted.records))
    }

    fn stream_to_emitted_bytes(&self) -> HashMap<StreamKey, u64> {
        named(self.stream_snapshots(), |s| Some(s.emitted.bytes))
    }

    /// Empty unless the source reports estimates per stream.
    fn stream_to_estimated_records(&self) -> HashMap<StreamKey, u64> {
        named(self.stream_snapshots(), |s| s.estimated.map(|e| e.records))
    }

    fn stream_to_estimated_bytes(&self) -> HashMap<StreamKey, u64> {
        named(self.stream_snapshots(), |s| s.estimated.map(|e| e.bytes))
    }

    /// Streams whose commit accounting is unreliable are left out.
    fn stream_to_committed_records(&self) -> HashMap<StreamKey, u64> {
        named(self.stream_snapshots(), |s| s.committed.map(|c| c.records))
    }

    fn stream_to_committed_bytes(&self) -> HashMap<StreamKey, u64> {
        named(self.stream_snapshots(), |s| s.committed.map(|c| c.bytes))
    }

    /// Attempt-wide stats. Once replication has completed successfully,
    /// committed is reported equal to emitted.
    fn total_stats(&self, has_replication_completed: bool) -> SyncStats {
        let snapshots = self.stream_snapshots();
        let records_emitted = snapshots.values().map(|s| s.emitted.records).sum();
        let bytes_emitted = snapshots.values().map(|s| s.emitted.bytes).sum();

        let (records_committed, bytes_committed) = if has_replication_completed {
            (Some(records_emitted), Some(bytes_emitted))
        } else {
            (self.total_records_committed(), self.total_bytes_committed())
        };

        SyncStats {
            records_emitted,
            bytes_emitted,
            records_committed,
            bytes_committed,
            records_rejected: snapshots.values().map(|s| s.rejected_records).sum(),
            estimated_records: self.total_records_estimated(),
            estimated_bytes: self.total_bytes_estimated(),
            source_state_messages_emitted: self.total_source_state_messages_emitted(),
            destination_state_messages_emitted: self.total_destination_state_messages_emitted(),
            max_seconds_before_source_state_message_emitted: self
                .max_seconds_to_receive_source_state_message(),
            mean_seconds_before_source_state_message_emitted: self
                .mean_seconds_to_receive_source_state_message(),
            max_seconds_between_state_message_emitted_and_committed: self
                .max_seconds_between_state_message_emitted_and_committed(),
            mean_seconds_between_state_message_emitted_and_committed: self
                .mean_seconds_between_state_message_emitted_and_committed(),
        }
    }

    /// Per-stream stats for named streams, ordered by key.
    fn per_stream_stats(&self, has_replication_completed: bool) -> Vec<StreamSyncStats> {
        self.stream_snapshots()
            .into_iter()
            .filter(|(key, _)| key.is_named())
            .map(|(key, s)| {
                let committed = if has_replication_completed {
                    Some(s.emitted)
                } else {
                    s.committed
                };
                StreamSyncStats {
                    stream_name: key.name().to_string(),
                    stream_namespace: key.namespace().map(str::to_string),
                    stats: SyncStats {
                        records_emitted: s.emitted.records,
                        bytes_emitted: s.emitted.bytes,
                        records_committed: committed.map(|c| c.records),
                        bytes_committed: committed.map(|c| c.bytes),
                        records_rejected: s.rejected_records,
                        estimated_records: s.estimated.map(|e| e.records),
                        estimated_bytes: s.estimated.map(|e| e.bytes),
                        source_state_messages_emitted: s.source_state_count,
                        destination_state_messages_emitted: s.destination_state_count,
                        max_seconds_before_source_state_message_emitted: s
                            .max_seconds_to_receive_source_state,
                        mean_seconds_before_source_state_message_emitted: s
                            .mean_seconds_to_receive_source_state,
                        max_seconds_between_state_message_emitted_and_committed: s
                            .max_seconds_between_state_and_commit,
                        mean_seconds_between_state_message_emitted_and_committed: s
                            .mean_seconds_between_state_and_commit,
                    },
                }
            })
            .collect()
    }
}

fn named<F>(snapshots: BTreeMap<StreamKey, StreamStatsSnapshot>, value: F) -> HashMap<StreamKey, u64>
where
    F: Fn(&StreamStatsSnapshot) -> Option<u64>,
{
    snapshots
        .into_iter()
        .filter(|(key, _)| key.is_named())
        .filter_map(|(key, snapshot)| value(&snapshot).map(|v| (key, v)))
        .collect()
}

/// Builds the tracker selected by `config.strategy`.
pub fn build_stats_tracker(
    config: &BookkeepingConfig,
    metrics: Arc<dyn MetricClient>,
) -> Arc<dyn SyncStatsTracker> {
    match config.strategy {
        StatsStrategy::Parallel => Arc::new(ParallelStatsTracker::new(metrics)),
        StatsStrategy::Sequential => Arc::new(SequentialStatsTracker::new(
            config.delta_tracker_memory_limit_bytes,
            config.state_metrics_message_limit,
            metrics,
        )),
    }
}
