use super::counters::{CountersSnapshot, StatsCounters};
use super::stream::{StreamStatsSnapshot, StreamStatsTracker};
use super::SyncStatsTracker;
use crate::error::EstimateError;
use crate::metrics::{MetricClient, TrackerMetric};
use crate::state::Fingerprint;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use model::core::identifiers::{StreamKey, StreamKeyView};
use model::protocol::{EstimateTrace, EstimateType, RecordMessage, StateMessage, StateType};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tracing::{error, warn};

/// Concurrent strategy: one [`StreamStatsTracker`] per stream, updated
/// independently, with totals summed at read time.
///
/// A stream that becomes unreliable only drops its own committed counts
/// from the totals. Mixing STREAM and SYNC estimates disables estimates for
/// the rest of the attempt instead of failing.
pub struct ParallelStatsTracker {
    streams: DashMap<StreamKey, Arc<StreamStatsTracker>>,
    metrics: Arc<dyn MetricClient>,
    expected_estimate_type: Mutex<Option<EstimateType>>,
    estimates_unreliable: AtomicBool,
    sync_estimate: StatsCounters,
    has_sync_estimate: AtomicBool,
    checksum_validation: AtomicBool,
    source_states: AtomicU64,
    destination_states: AtomicU64,
}

impl ParallelStatsTracker {
    pub fn new(metrics: Arc<dyn MetricClient>) -> Self {
        Self {
            streams: DashMap::new(),
            metrics,
            expected_estimate_type: Mutex::new(None),
            estimates_unreliable: AtomicBool::new(false),
            sync_estimate: StatsCounters::new(),
            has_sync_estimate: AtomicBool::new(false),
            checksum_validation: AtomicBool::new(true),
            source_states: AtomicU64::new(0),
            destination_states: AtomicU64::new(0),
        }
    }

    /// Returns the tracker for `key`, creating it on first touch.
    pub fn stream_tracker(&self, key: &StreamKey) -> Arc<StreamStatsTracker> {
        if let Some(existing) = self.streams.get(key) {
            return Arc::clone(existing.value());
        }
        self.streams
            .entry(key.clone())
            .or_insert_with(|| Arc::new(StreamStatsTracker::new(key.clone(), Arc::clone(&self.metrics))))
            .value()
            .clone()
    }

    pub fn estimates_unreliable(&self) -> bool {
        self.estimates_unreliable.load(Ordering::Acquire)
    }

    pub fn checksum_validation_enabled(&self) -> bool {
        self.checksum_validation.load(Ordering::Acquire)
    }

    pub fn update_source_states_stats_at(&self, state: &StateMessage, received_at: DateTime<Utc>) {
        self.source_states.fetch_add(1, Ordering::Relaxed);
        let fingerprint = Fingerprint::of(state);

        let keys = state.stream_keys();
        let mut staged_records = 0u64;
        let mut fully_staged = true;
        for key in &keys {
            let tracker = self.stream_tracker(key);
            match tracker.track_state_from_source_at(fingerprint, received_at) {
                Some(staged) => staged_records += staged.records,
                None => {
                    fully_staged = false;
                    if tracker.is_unreliable() {
                        self.disable_checksum_validation();
                    }
                }
            }
        }

        if !fully_staged || !self.checksum_validation_enabled() {
            return;
        }
        let Some(expected) = state.source_stats.as_ref().and_then(|s| s.record_count) else {
            return;
        };
        // A global checkpoint covers every record the source emitted since the
        // previous one, including streams it does not list.
        if state.state_type == StateType::Global {
            staged_records += self
                .streams
                .iter()
                .filter(|entry| !keys.contains(entry.key()))
                .map(|entry| entry.value().pending().records)
                .sum::<u64>();
        }
        self.validate_checksum("source", "tracked", expected, staged_records as f64, state);
    }

    pub fn update_destination_state_stats_at(&self, state: &StateMessage, committed_at: DateTime<Utc>) {
        self.destination_states.fetch_add(1, Ordering::Relaxed);
        let fingerprint = Fingerprint::of(state);

        // Rejections are reported per stream; a GLOBAL ack cannot be attributed.
        let rejected = match state.state_type {
            StateType::Stream => state
                .destination_stats
                .as_ref()
                .and_then(|s| s.rejected_record_count)
                .map(|count| count.max(0.0) as u64)
                .unwrap_or(0),
            _ => 0,
        };

        let mut credited = CountersSnapshot::default();
        let mut fully_matched = true;
        for key in state.stream_keys() {
            let tracker = self.stream_tracker(&key);
            match tracker.track_state_from_destination_at(fingerprint, rejected, committed_at) {
                Some(counts) => credited = credited.saturating_add(counts),
                None => fully_matched = false,
            }
        }

        if !fully_matched || !self.checksum_validation_enabled() {
            return;
        }
        if let Some(destination) = state.destination_stats.as_ref().and_then(|s| s.record_count) {
            self.validate_checksum("destination", "tracked", destination, credited.records as f64, state);
            if let Some(source) = state.source_stats.as_ref().and_then(|s| s.record_count) {
                self.validate_checksum("destination", "source", destination, source, state);
            }
        }
    }

    fn validate_checksum(
        &self,
        origin: &'static str,
        compared_with: &'static str,
        reported: f64,
        expected: f64,
        state: &StateMessage,
    ) {
        if reported == expected {
            return;
        }
        error!(
            origin,
            compared_with,
            reported,
            expected,
            state_type = ?state.state_type,
            "Checkpoint record count does not match"
        );
        self.metrics.count(TrackerMetric::ChecksumMismatch, 1);
    }

    fn disable_checksum_validation(&self) {
        if self.checksum_validation.swap(false, Ordering::AcqRel) {
            warn!("Disabling checkpoint checksum validation for the rest of the attempt");
        }
    }

    fn estimate_type(&self) -> Option<EstimateType> {
        *self.expected_estimate_type.lock()
    }

    fn sum_committed<F>(&self, value: F) -> Option<u64>
    where
        F: Fn(CountersSnapshot) -> u64,
    {
        if self.streams.is_empty() {
            return None;
        }
        Some(
            self.streams
                .iter()
                .filter_map(|entry| entry.value().committed())
                .map(value)
                .sum(),
        )
    }

    fn sum_estimated<F>(&self, value: F) -> Option<u64>
    where
        F: Fn(CountersSnapshot) -> u64,
    {
        if self.estimates_unreliable() {
            return None;
        }
        match self.estimate_type()? {
            EstimateType::Sync => self
                .has_sync_estimate
                .load(Ordering::Acquire)
                .then(|| value(self.sync_estimate.snapshot())),
            EstimateType::Stream => Some(
                self.streams
                    .iter()
                    .filter_map(|entry| entry.value().estimated())
                    .map(value)
                    .sum(),
            ),
        }
    }

    fn snapshots(&self) -> Vec<StreamStatsSnapshot> {
        self.streams.iter().map(|entry| entry.value().snapshot()).collect()
    }
}

impl SyncStatsTracker for ParallelStatsTracker {
    fn update_stats(&self, record: &RecordMessage) {
        let byte_size = record.estimated_byte_size();
        let view = (record.stream.as_str(), record.namespace.as_deref());
        let existing = self
            .streams
            .get(&view as &dyn StreamKeyView)
            .map(|entry| Arc::clone(entry.value()));
        match existing {
            Some(tracker) => tracker.track_record(byte_size),
            None => self.stream_tracker(&record.stream_key()).track_record(byte_size),
        }
    }

    fn update_estimates(&self, estimate: &EstimateTrace) -> Result<(), EstimateError> {
        if self.estimates_unreliable() {
            return Ok(());
        }

        {
            let mut expected = self.expected_estimate_type.lock();
            match *expected {
                None => *expected = Some(estimate.estimate_type),
                Some(current) if current != estimate.estimate_type => {
                    warn!(
                        expected = ?current,
                        received = ?estimate.estimate_type,
                        "STREAM and SYNC estimates mixed in one attempt; estimates disabled"
                    );
                    self.estimates_unreliable.store(true, Ordering::Release);
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        let records = estimate.row_estimate.unwrap_or(0);
        let bytes = estimate.byte_estimate.unwrap_or(0);
        match estimate.estimate_type {
            EstimateType::Stream => self
                .stream_tracker(&estimate.stream_key())
                .track_estimate(records, bytes),
            EstimateType::Sync => {
                self.sync_estimate.set(records, bytes);
                self.has_sync_estimate.store(true, Ordering::Release);
            }
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
        let hide_estimates =
            self.estimates_unreliable() || self.estimate_type() == Some(EstimateType::Sync);
        self.streams
            .iter()
            .map(|entry| {
                let mut snapshot = entry.value().snapshot();
                if hide_estimates {
                    snapshot.estimated = None;
                }
                (entry.key().clone(), snapshot)
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
        self.source_states.load(Ordering::Relaxed)
    }

    fn total_destination_state_messages_emitted(&self) -> u64 {
        self.destination_states.load(Ordering::Relaxed)
    }

    fn max_seconds_to_receive_source_state_message(&self) -> Option<u64> {
        self.snapshots()
            .iter()
            .filter_map(|s| s.max_seconds_to_receive_source_state)
            .max()
    }

    fn mean_seconds_to_receive_source_state_message(&self) -> Option<f64> {
        mean_of(self.snapshots().iter().filter_map(|s| s.mean_seconds_to_receive_source_state))
    }

    fn max_seconds_between_state_message_emitted_and_committed(&self) -> Option<u64> {
        self.snapshots()
            .iter()
            .filter_map(|s| s.max_seconds_between_state_and_commit)
            .max()
    }

    fn mean_seconds_between_state_message_emitted_and_committed(&self) -> Option<f64> {
        mean_of(self.snapshots().iter().filter_map(|s| s.mean_seconds_between_state_and_commit))
    }

    fn unreliable_committed_counts(&self) -> bool {
        self.streams.iter().any(|entry| entry.value().is_unreliable())
    }

    fn unreliable_state_timing_metrics(&self) -> bool {
        false
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrackerMetrics;
    use chrono::TimeZone;
    use model::core::identifiers::StreamDescriptor;
    use model::protocol::{StateStats, StreamState};
    use serde_json::json;
    use tracing_test::traced_test;

    fn tracker() -> (ParallelStatsTracker, TrackerMetrics) {
        let metrics = TrackerMetrics::new();
        (ParallelStatsTracker::new(Arc::new(metrics.clone())), metrics)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(stream: &str, payload: &str) -> RecordMessage {
        RecordMessage::new(stream, None, json!({ "v": payload }))
    }

    fn stream_state(stream: &str, cursor: i64) -> StateMessage {
        StateMessage::for_stream(StreamDescriptor::new(stream, None), json!({ "cursor": cursor }))
    }

    fn key(stream: &str) -> StreamKey {
        StreamKey::new(stream, None)
    }

    #[test]
    fn streams_are_accounted_independently() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_stats(&record("users", "b"));
        tracker.update_stats(&record("orders", "c"));
        tracker.update_source_states_stats(&stream_state("users", 1));
        tracker.update_destination_state_stats(&stream_state("users", 1));

        assert_eq!(tracker.total_records_emitted(), 3);
        assert_eq!(tracker.total_records_committed(), Some(2));
        assert_eq!(tracker.stream_to_committed_records().get(&key("orders")), Some(&0));
        assert_eq!(tracker.stream_to_emitted_records().get(&key("orders")), Some(&1));
        assert_eq!(tracker.total_source_state_messages_emitted(), 1);
        assert_eq!(tracker.total_destination_state_messages_emitted(), 1);
    }

    #[test]
    fn unreliable_stream_only_drops_its_own_committed() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_stats(&record("orders", "b"));
        tracker.update_source_states_stats(&stream_state("orders", 1));
        tracker.update_destination_state_stats(&stream_state("orders", 1));

        tracker.update_source_states_stats(&stream_state("users", 1));
        tracker.update_source_states_stats(&stream_state("users", 1));

        assert!(tracker.unreliable_committed_counts());
        assert_eq!(tracker.total_records_committed(), Some(1));
        assert!(!tracker.stream_to_committed_records().contains_key(&key("users")));
        assert!(!tracker.checksum_validation_enabled());

        let users = tracker
            .per_stream_stats(false)
            .into_iter()
            .find(|s| s.stream_name == "users")
            .unwrap();
        assert_eq!(users.stats.records_committed, None);
        assert_eq!(users.stats.records_emitted, 1);
    }

    #[test]
    fn global_checkpoint_fans_out_to_listed_streams() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_stats(&record("orders", "b"));
        tracker.update_stats(&record("orders", "c"));

        let global = StateMessage::for_global(
            Some(json!({"lsn": 42})),
            ["users", "orders"]
                .into_iter()
                .map(|name| StreamState {
                    stream_descriptor: StreamDescriptor::new(name, None),
                    stream_state: None,
                })
                .collect(),
        );
        tracker.update_source_states_stats(&global);
        tracker.update_destination_state_stats(&global);

        assert_eq!(tracker.stream_to_committed_records().get(&key("users")), Some(&1));
        assert_eq!(tracker.stream_to_committed_records().get(&key("orders")), Some(&2));
        assert_eq!(tracker.total_source_state_messages_emitted(), 1);
    }

    #[traced_test]
    #[test]
    fn global_source_checksum_covers_unlisted_streams() {
        let (tracker, metrics) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_stats(&record("orders", "b"));
        tracker.update_stats(&record("orders", "c"));

        let global = |lsn: i64, count: f64| {
            StateMessage::for_global(
                Some(json!({ "lsn": lsn })),
                vec![StreamState {
                    stream_descriptor: StreamDescriptor::new("users", None),
                    stream_state: None,
                }],
            )
            .with_source_stats(StateStats::with_record_count(count))
        };

        tracker.update_source_states_stats(&global(1, 3.0));
        assert_eq!(metrics.get(TrackerMetric::ChecksumMismatch), 0);

        // orders still holds its two records; only users was swapped out.
        tracker.update_stats(&record("users", "d"));
        tracker.update_source_states_stats(&global(2, 1.0));
        assert_eq!(metrics.get(TrackerMetric::ChecksumMismatch), 1);
        assert!(logs_contain("Checkpoint record count does not match"));
    }

    #[test]
    fn legacy_checkpoints_count_in_totals_only() {
        let (tracker, _) = tracker();
        let legacy = StateMessage::legacy(json!({"all": 1}));
        tracker.update_stats(&record("users", "a"));
        tracker.update_source_states_stats(&legacy);
        tracker.update_destination_state_stats(&legacy);

        assert_eq!(tracker.per_stream_stats(false).len(), 1);
        assert_eq!(tracker.stream_snapshots().len(), 2);
        assert_eq!(tracker.total_records_committed(), Some(0));
    }

    #[test]
    fn nothing_tracked_has_no_committed_total() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.total_records_committed(), None);
        assert_eq!(tracker.total_bytes_committed(), None);

        tracker.update_stats(&record("users", "a"));
        assert_eq!(tracker.total_records_committed(), Some(0));
    }

    #[test]
    fn repeated_records_reuse_the_stream_tracker() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_stats(&record("users", "b"));
        tracker.update_stats(&RecordMessage::new("users", Some("public"), json!({ "v": "c" })));

        let snapshots = tracker.stream_snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[&key("users")].emitted.records, 2);
        assert_eq!(snapshots[&StreamKey::new("users", Some("public"))].emitted.records, 1);
    }

    #[test]
    fn mixed_estimates_disable_estimates() {
        let (tracker, _) = tracker();
        tracker
            .update_estimates(&EstimateTrace::for_stream("users", None, 10, 100))
            .unwrap();
        assert_eq!(tracker.total_records_estimated(), Some(10));
        assert_eq!(tracker.stream_to_estimated_records().get(&key("users")), Some(&10));

        tracker.update_estimates(&EstimateTrace::for_sync(50, 500)).unwrap();

        assert!(tracker.estimates_unreliable());
        assert_eq!(tracker.total_records_estimated(), None);
        assert_eq!(tracker.total_bytes_estimated(), None);
        assert!(tracker.stream_to_estimated_records().is_empty());
    }

    #[test]
    fn sync_estimates_report_totals_only() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_estimates(&EstimateTrace::for_sync(50, 500)).unwrap();
        tracker.update_estimates(&EstimateTrace::for_sync(60, 600)).unwrap();

        assert_eq!(tracker.total_records_estimated(), Some(60));
        assert_eq!(tracker.total_bytes_estimated(), Some(600));
        assert!(tracker.stream_to_estimated_records().is_empty());
    }

    #[test]
    fn no_estimates_is_unavailable() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        assert_eq!(tracker.total_records_estimated(), None);
        assert!(tracker.stream_to_estimated_bytes().is_empty());
    }

    #[test]
    fn max_seconds_to_receive_reads_source_side_timing() {
        let (tracker, _) = tracker();
        tracker.update_source_states_stats_at(&stream_state("users", 1), at(0));
        tracker.update_destination_state_stats_at(&stream_state("users", 1), at(2));
        tracker.update_source_states_stats_at(&stream_state("users", 2), at(30));
        tracker.update_destination_state_stats_at(&stream_state("users", 2), at(33));

        assert_eq!(tracker.max_seconds_to_receive_source_state_message(), Some(30));
        assert_eq!(tracker.mean_seconds_to_receive_source_state_message(), Some(30.0));
        assert_eq!(tracker.max_seconds_between_state_message_emitted_and_committed(), Some(3));
        assert_eq!(
            tracker.mean_seconds_between_state_message_emitted_and_committed(),
            Some(2.5)
        );
    }

    #[traced_test]
    #[test]
    fn checksum_mismatch_is_counted_not_fatal() {
        let (tracker, metrics) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_stats(&record("users", "b"));

        let state = stream_state("users", 1).with_source_stats(StateStats::with_record_count(3.0));
        tracker.update_source_states_stats(&state);
        let acked = state.with_destination_stats(StateStats::with_record_count(2.0));
        tracker.update_destination_state_stats(&acked);

        // source reported 3 but 2 were tracked; destination 2 vs source 3
        assert_eq!(metrics.get(TrackerMetric::ChecksumMismatch), 2);
        assert_eq!(tracker.total_records_committed(), Some(2));
        assert!(logs_contain("Checkpoint record count does not match"));
    }

    #[test]
    fn matching_checksums_stay_quiet() {
        let (tracker, metrics) = tracker();
        tracker.update_stats(&record("users", "a"));
        let state = stream_state("users", 1).with_source_stats(StateStats::with_record_count(1.0));
        tracker.update_source_states_stats(&state);
        tracker.update_destination_state_stats(
            &state.with_destination_stats(StateStats::with_record_count(1.0)),
        );
        assert_eq!(metrics.get(TrackerMetric::ChecksumMismatch), 0);
    }

    #[test]
    fn rejected_records_are_reported() {
        let (tracker, _) = tracker();
        for v in ["a", "b", "c"] {
            tracker.update_stats(&record("users", v));
        }
        let state = stream_state("users", 1);
        tracker.update_source_states_stats(&state);
        tracker.update_destination_state_stats(&state.with_destination_stats(StateStats {
            record_count: None,
            rejected_record_count: Some(1.0),
        }));

        let total = tracker.total_stats(false);
        assert_eq!(total.records_committed, Some(2));
        assert_eq!(total.records_rejected, 1);
    }

    #[test]
    fn completed_replication_reports_committed_as_emitted() {
        let (tracker, _) = tracker();
        tracker.update_stats(&record("users", "a"));
        tracker.update_source_states_stats(&stream_state("users", 1));

        let pending = tracker.total_stats(false);
        assert_eq!(pending.records_committed, Some(0));

        let done = tracker.total_stats(true);
        assert_eq!(done.records_committed, Some(1));
        assert_eq!(done.bytes_committed, Some(done.bytes_emitted));
        assert_eq!(tracker.per_stream_stats(true)[0].stats.records_committed, Some(1));
    }
}
