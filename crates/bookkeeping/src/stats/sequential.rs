use super::counters::CountersSnapshot;
use super::stream::StreamStatsSnapshot;
use super::SyncStatsTracker;
use crate::error::{DeltaTrackerError, EstimateError};
use crate::metrics::{MetricClient, TrackerMetric};
use crate::state::{Fingerprint, StateDeltaTracker, StateMetricsTracker, StreamDelta};
use chrono::{DateTime, Utc};
use model::core::identifiers::StreamKey;
use model::protocol::{EstimateTrace, EstimateType, RecordMessage, StateMessage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

struct SequentialState {
    stream_indices: HashMap<StreamKey, u16>,
    running: HashMap<StreamKey, CountersSnapshot>,
    emitted: HashMap<StreamKey, CountersSnapshot>,
    estimated: HashMap<StreamKey, CountersSnapshot>,
    sync_estimate: Option<CountersSnapshot>,
    expected_estimate_type: Option<EstimateType>,
    estimates_unreliable: bool,
    deltas: StateDeltaTracker,
    timing: StateMetricsTracker,
    unreliable_committed_counts: bool,
    unreliable_state_timing: bool,
}

impl SequentialState {
    fn touch(&mut self, key: &StreamKey) {
        if !self.emitted.contains_key(key) {
            self.emitted.insert(key.clone(), CountersSnapshot::default());
        }
    }

    fn index_of(&mut self, key: &StreamKey) -> Option<u16> {
        if let Some(index) = self.stream_indices.get(key) {
            return Some(*index);
        }
        let index = u16::try_from(self.stream_indices.len()).ok()?;
        self.stream_indices.insert(key.clone(), index);
        Some(index)
    }

    fn mark_committed_unreliable(&mut self, reason: &str) {
        if !self.unreliable_committed_counts {
            warn!(reason, "Committed counts are no longer reliable for this attempt");
        }
        self.unreliable_committed_counts = true;
    }

    fn mark_timing_unreliable(&mut self, reason: &str) {
        if !self.unreliable_state_timing {
            warn!(reason, "State timing metrics are no longer reliable for this attempt");
        }
        self.unreliable_state_timing = true;
    }

    fn committed_for(&self, key: &StreamKey) -> Option<CountersSnapshot> {
        if self.unreliable_committed_counts {
            return None;
        }
        let emitted = self.emitted.get(key).copied().unwrap_or_default();
        let committed = match self.stream_indices.get(key) {
            Some(index) => CountersSnapshot::new(
                self.deltas.committed_records(*index),
                self.deltas.committed_bytes(*index),
            ),
            None => CountersSnapshot::default(),
        };
        Some(committed.capped_at(emitted))
    }
}

/// Single-writer strategy.
///
/// Keeps one running counter per stream, reset at every source checkpoint,
/// and hands the per-checkpoint deltas to a shared [`StateDeltaTracker`]
/// keyed by the 32-bit fingerprint. Running out of delta memory disables
/// committed counts for the whole attempt.
pub struct SequentialStatsTracker {
    state: Mutex<SequentialState>,
    metrics: Arc<dyn MetricClient>,
}

impl SequentialStatsTracker {
    pub fn new(
        delta_memory_limit_bytes: usize,
        state_message_limit: usize,
        metrics: Arc<dyn MetricClient>,
    ) -> Self {
        Self {
            state: Mutex::new(SequentialState {
                stream_indices: HashMap::new(),
                running: HashMap::new(),
                emitted: HashMap::new(),
                estimated: HashMap::new(),
                sync_estimate: None,
                expected_estimate_type: None,
                estimates_unreliable: false,
                deltas: StateDeltaTracker::new(delta_memory_limit_bytes),
                timing: StateMetricsTracker::new(state_message_limit),
                unreliable_committed_counts: false,
                unreliable_state_timing: false,
            }),
            metrics,
        }
    }

    pub fn update_stats_at(&self, record: &RecordMessage, received_at: DateTime<Utc>) {
        let key = record.stream_key();
        let size = record.estimated_byte_size();
        let one = CountersSnapshot::new(1, size);

        let mut state = self.state.lock();
        state.timing.record_first_record(received_at);
        let running = state.running.entry(key.clone()).or_default();
        *running = running.saturating_add(one);
        let emitted = state.emitted.entry(key).or_default();
        *emitted = emitted.saturating_add(one);
    }

    pub fn update_source_states_stats_at(&self, message: &StateMessage, received_at: DateTime<Utc>) {
        let hash = Fingerprint::of(message).short();
        let mut state = self.state.lock();

        for key in message.stream_keys() {
            state.touch(&key);
        }

        if state.timing.add_state(message, hash, received_at).is_err() {
            state.mark_timing_unreliable("state timing capacity exceeded");
        }

        let running = std::mem::take(&mut state.running);
        if state.unreliable_committed_counts {
            return;
        }

        if state.deltas.is_pending(hash) {
            self.metrics.count(TrackerMetric::StateCollisionFromSource, 1);
            state.mark_committed_unreliable("source state hash collision");
            return;
        }

        let mut deltas = Vec::with_capacity(running.len());
        for (key, counts) in running {
            match state.index_of(&key) {
                Some(stream_index) => deltas.push(StreamDelta {
                    stream_index,
                    records: counts.records,
                    bytes: counts.bytes,
                }),
                None => {
                    state.mark_committed_unreliable("too many streams to index");
                    return;
                }
            }
        }

        if let Err(err) = state.deltas.add_state(hash, &deltas) {
            state.mark_committed_unreliable(&err.to_string());
        }
    }

    pub fn update_destination_state_stats_at(
        &self,
        message: &StateMessage,
        committed_at: DateTime<Utc>,
    ) {
        let hash = Fingerprint::of(message).short();
        let mut state = self.state.lock();

        if let Err(err) = state.timing.update_states(message, hash, committed_at) {
            state.mark_timing_unreliable(&err.to_string());
        }

        if state.unreliable_committed_counts {
            return;
        }

        match state.deltas.commit_state_hash(hash) {
            Ok(()) => {}
            Err(DeltaTrackerError::CapacityExceeded) => {
                state.mark_committed_unreliable("state delta capacity exceeded");
            }
            Err(err) => {
                warn!(error = %err, "Destination acknowledged an unknown checkpoint, ignoring");
                self.metrics.count(TrackerMetric::UnknownStateFromDestination, 1);
            }
        }
    }

    fn sum_committed<F>(&self, value: F) -> Option<u64>
    where
        F: Fn(CountersSnapshot) -> u64,
    {
        let state = self.state.lock();
        if state.unreliable_committed_counts || state.emitted.is_empty() {
            return None;
        }
        Some(
            state
                .emitted
                .keys()
                .filter_map(|key| state.committed_for(key))
                .map(value)
                .sum(),
        )
    }

    fn sum_estimated<F>(&self, value: F) -> Option<u64>
    where
        F: Fn(CountersSnapshot) -> u64,
    {
        let state = self.state.lock();
        if state.estimates_unreliable {
            return None;
        }
        match state.expected_estimate_type? {
            EstimateType::Sync => state.sync_estimate.map(value),
            EstimateType::Stream => Some(state.estimated.values().copied().map(value).sum()),
        }
    }

    fn timing_value<T>(&self, read: impl Fn(&StateMetricsTracker) -> Option<T>) -> Option<T> {
        let state = self.state.lock();
        if state.unreliable_state_timing {
            return None;
        }
        read(&state.timing)
    }
}

impl SyncStatsTracker for SequentialStatsTracker {
    fn update_stats(&self, record: &RecordMessage) {
        self.update_stats_at(record, Utc::now());
    }

    /// Rejects an estimate whose granularity differs from the first one seen,
    /// and disables estimates for the rest of the attempt.
    fn update_estimates(&self, estimate: &EstimateTrace) -> Result<(), EstimateError> {
        let mut state = self.state.lock();
        match state.expected_estimate_type {
            None => state.expected_estimate_type = Some(estimate.estimate_type),
            Some(expected) if expected != estimate.estimate_type => {
                state.estimates_unreliable = true;
                return Err(EstimateError::MixedEstimateTypes);
            }
            Some(_) => {}
        }
        if state.estimates_unreliable {
            return Ok(());
        }

        let counts = CountersSnapshot::new(
            estimate.row_estimate.unwrap_or(0),
            estimate.byte_estimate.unwrap_or(0),
        );
        match estimate.estimate_type {
            EstimateType::Stream => {
                let key = estimate.stream_key();
                state.touch(&key);
                state.estimated.insert(key, counts);
            }
            EstimateType::Sync => state.sync_estimate = Some(counts),
        }
        Ok(())
    }

    fn update_source_states_stats(&self, state: &StateMessage) {
        self.update_source_states_stats_at(state, Utc::now());
    }

    fn update_destination_state_stats(&self, state: &StateMessage) {
        self.update_destination_state_stats_at(state, Utc::now());
    }

    fn stream_snapshots(&self) -> BTreeMap<StreamKey, StreamStatsSnapshot> {
        let state = self.state.lock();
        let show_estimates = !state.estimates_unreliable
            && state.expected_estimate_type == Some(EstimateType::Stream);

        state
            .emitted
            .iter()
            .map(|(key, emitted)| {
                let snapshot = StreamStatsSnapshot {
                    emitted: *emitted,
                    committed: state.committed_for(key),
                    estimated: show_estimates
                        .then(|| state.estimated.get(key).copied())
                        .flatten(),
                    unreliable: state.unreliable_committed_counts,
                    ..Default::default()
                };
                (key.clone(), snapshot)
            })
            .collect()
    }

    fn total_records_estimated(&self) -> Option<u64> {
        self.sum_estimated(|c| c.records)
    }

    fn total_bytes_estimated(&self) -> Option<u64> {
        self.sum_estimated(|c| c.bytes)
    }

    fn total_records_committed(&self) -> Option<u64> {
        self.sum_committed(|c| c.records)
    }

    fn total_bytes_committed(&self) -> Option<u64> {
        self.sum_committed(|c| c.bytes)
    }

    fn total_source_state_messages_emitted(&self) -> u64 {
        self.state.lock().timing.source_state_count()
    }

    fn total_destination_state_messages_emitted(&self) -> u64 {
        self.state.lock().timing.destination_state_count()
    }

    fn max_seconds_to_receive_source_state_message(&self) -> Option<u64> {
        self.timing_value(|t| t.max_seconds_to_receive_state())
    }

    fn mean_seconds_to_receive_source_state_message(&self) -> Option<f64> {
        self.timing_value(|t| t.mean_seconds_to_receive_state())
    }

    fn max_seconds_between_state_message_emitted_and_committed(&self) -> Option<u64> {
        self.timing_value(|t| t.max_seconds_between_emitted_and_committed())
    }

    fn mean_seconds_between_state_message_emitted_and_committed(&self) -> Option<f64> {
        self.timing_value(|t| t.mean_seconds_between_emitted_and_committed())
    }

    fn unreliable_committed_counts(&self) -> bool {
        self.state.lock().unreliable_committed_counts
    }

    fn unreliable_state_timing_metrics(&self) -> bool {
        self.state.lock().unreliable_state_timing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrackerMetrics;
    use chrono::TimeZone;
    use model::core::identifiers::StreamDescriptor;
    use serde_json::json;

    fn tracker(memory: usize, messages: usize) -> (SequentialStatsTracker, TrackerMetrics) {
        let metrics = TrackerMetrics::new();
        (
            SequentialStatsTracker::new(memory, messages, Arc::new(metrics.clone())),
            metrics,
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(stream: &str) -> RecordMessage {
        RecordMessage::new(stream, None, json!({ "id": 1 }))
    }

    fn stream_state(stream: &str, cursor: i64) -> StateMessage {
        StateMessage::for_stream(StreamDescriptor::new(stream, None), json!({ "cursor": cursor }))
    }

    fn key(stream: &str) -> StreamKey {
        StreamKey::new(stream, None)
    }

    #[test]
    fn nothing_tracked_has_no_committed_total() {
        let (tracker, _) = tracker(1024, 100);
        assert_eq!(tracker.total_records_committed(), None);

        tracker.update_stats(&record("users"));
        assert_eq!(tracker.total_records_committed(), Some(0));
        assert_eq!(tracker.total_bytes_committed(), Some(0));
    }

    #[test]
    fn commits_are_attributed_per_stream() {
        let (tracker, _) = tracker(1024, 100);
        tracker.update_stats(&record("users"));
        tracker.update_stats(&record("users"));
        tracker.update_stats(&record("orders"));
        tracker.update_source_states_stats(&stream_state("users", 1));
        tracker.update_stats(&record("orders"));
        tracker.update_source_states_stats(&stream_state("orders", 1));

        tracker.update_destination_state_stats(&stream_state("users", 1));
        assert_eq!(tracker.stream_to_committed_records().get(&key("users")), Some(&2));
        assert_eq!(tracker.stream_to_committed_records().get(&key("orders")), Some(&1));

        tracker.update_destination_state_stats(&stream_state("orders", 1));
        assert_eq!(tracker.total_records_committed(), Some(4));
        assert_eq!(tracker.total_records_emitted(), 4);
        assert_eq!(
            tracker.total_bytes_committed(),
            Some(tracker.total_bytes_emitted())
        );
    }

    #[test]
    fn capacity_exhaustion_disables_committed_only() {
        // Too small for even one delta.
        let (tracker, _) = tracker(8, 100);
        tracker.update_stats(&record("users"));
        tracker.update_source_states_stats(&stream_state("users", 1));
        tracker.update_destination_state_stats(&stream_state("users", 1));
        tracker.update_stats(&record("users"));

        assert!(tracker.unreliable_committed_counts());
        assert_eq!(tracker.total_records_committed(), None);
        assert!(tracker.stream_to_committed_records().is_empty());
        assert_eq!(tracker.total_records_emitted(), 2);
        assert!(!tracker.unreliable_state_timing_metrics());
        assert_eq!(tracker.total_stats(false).records_committed, None);
        assert_eq!(tracker.total_stats(true).records_committed, Some(2));
    }

    #[test]
    fn colliding_source_hash_disables_committed() {
        let (tracker, metrics) = tracker(1024, 100);
        tracker.update_stats(&record("users"));
        tracker.update_source_states_stats(&stream_state("users", 1));
        tracker.update_source_states_stats(&stream_state("users", 1));

        assert!(tracker.unreliable_committed_counts());
        assert_eq!(metrics.get(TrackerMetric::StateCollisionFromSource), 1);
    }

    #[test]
    fn unknown_and_repeated_acks_are_ignored() {
        let (tracker, metrics) = tracker(1024, 100);
        tracker.update_stats(&record("users"));
        tracker.update_source_states_stats(&stream_state("users", 1));
        tracker.update_destination_state_stats(&stream_state("users", 1));
        tracker.update_destination_state_stats(&stream_state("users", 1));
        tracker.update_destination_state_stats(&stream_state("users", 9));

        assert_eq!(tracker.total_records_committed(), Some(1));
        assert!(!tracker.unreliable_committed_counts());
        assert_eq!(metrics.get(TrackerMetric::UnknownStateFromDestination), 2);
        // the timing tracker could not match either extra ack
        assert!(tracker.unreliable_state_timing_metrics());
        assert_eq!(tracker.max_seconds_between_state_message_emitted_and_committed(), None);
    }

    #[test]
    fn mixed_estimates_are_rejected() {
        let (tracker, _) = tracker(1024, 100);
        tracker
            .update_estimates(&EstimateTrace::for_stream("users", None, 5, 50))
            .unwrap();
        assert_eq!(tracker.total_records_estimated(), Some(5));

        assert_eq!(
            tracker.update_estimates(&EstimateTrace::for_sync(10, 100)),
            Err(EstimateError::MixedEstimateTypes)
        );
        assert_eq!(tracker.total_records_estimated(), None);
        assert!(tracker.stream_to_estimated_records().is_empty());
    }

    #[test]
    fn timing_uses_first_record_and_matched_state() {
        let (tracker, _) = tracker(1024, 100);
        tracker.update_stats_at(&record("users"), at(10));
        tracker.update_source_states_stats_at(&stream_state("users", 1), at(16));
        tracker.update_source_states_stats_at(&stream_state("users", 2), at(18));
        tracker.update_destination_state_stats_at(&stream_state("users", 2), at(25));

        assert_eq!(tracker.max_seconds_to_receive_source_state_message(), Some(6));
        assert_eq!(tracker.mean_seconds_to_receive_source_state_message(), Some(4.0));
        assert_eq!(tracker.max_seconds_between_state_message_emitted_and_committed(), Some(7));
        assert_eq!(tracker.total_source_state_messages_emitted(), 2);
        assert_eq!(tracker.total_destination_state_messages_emitted(), 1);
    }
}
