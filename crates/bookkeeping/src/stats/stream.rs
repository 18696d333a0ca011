use super::counters::{CountersSnapshot, StatsCounters};
use crate::metrics::{MetricClient, TrackerMetric};
use crate::state::{Fingerprint, SecondsStat, seconds_between};
use chrono::{DateTime, Utc};
use model::core::identifiers::StreamKey;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tracing::{debug, warn};

struct StagedCheckpoint {
    fingerprint: Fingerprint,
    // Shared with in-flight record paths that captured the bucket before the swap.
    counters: Arc<StatsCounters>,
    received_at: DateTime<Utc>,
}

#[derive(Default)]
struct StagedCheckpoints {
    queue: VecDeque<StagedCheckpoint>,
    in_flight: HashSet<Fingerprint>,
    previous_received_at: Option<DateTime<Utc>>,
    to_receive: SecondsStat,
    to_commit: SecondsStat,
}

/// Point-in-time view of one stream's accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamStatsSnapshot {
    pub emitted: CountersSnapshot,
    /// `None` once the stream's commit accounting is unreliable.
    pub committed: Option<CountersSnapshot>,
    pub estimated: Option<CountersSnapshot>,
    pub rejected_records: u64,
    pub source_state_count: u64,
    pub destination_state_count: u64,
    pub max_seconds_to_receive_source_state: Option<u64>,
    pub mean_seconds_to_receive_source_state: Option<f64>,
    pub max_seconds_between_state_and_commit: Option<u64>,
    pub mean_seconds_between_state_and_commit: Option<f64>,
    pub unreliable: bool,
}

/// Emitted, estimated and committed accounting for a single stream.
///
/// Records land in a "current bucket" that is swapped out and staged each
/// time the source emits a checkpoint. A destination acknowledgment drains
/// staged buckets in order up to the matching fingerprint and credits them as
/// committed, so one acknowledgment may cover several source checkpoints.
pub struct StreamStatsTracker {
    key: StreamKey,
    metrics: Arc<dyn MetricClient>,
    current: RwLock<Arc<StatsCounters>>,
    emitted: StatsCounters,
    committed: StatsCounters,
    estimated: StatsCounters,
    has_estimate: AtomicBool,
    rejected_records: AtomicU64,
    source_states: AtomicU64,
    destination_states: AtomicU64,
    unreliable: AtomicBool,
    staged: Mutex<StagedCheckpoints>,
}

impl StreamStatsTracker {
    pub fn new(key: StreamKey, metrics: Arc<dyn MetricClient>) -> Self {
        Self {
            key,
            metrics,
            current: RwLock::new(Arc::new(StatsCounters::new())),
            emitted: StatsCounters::new(),
            committed: StatsCounters::new(),
            estimated: StatsCounters::new(),
            has_estimate: AtomicBool::new(false),
            rejected_records: AtomicU64::new(0),
            source_states: AtomicU64::new(0),
            destination_states: AtomicU64::new(0),
            unreliable: AtomicBool::new(false),
            staged: Mutex::new(StagedCheckpoints::default()),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn track_record(&self, byte_size: u64) {
        // Capture the bucket first: a concurrent checkpoint may swap it out,
        // and the increment must land in the bucket that gets staged.
        let bucket = self.current.read().clone();
        bucket.add(1, byte_size);
        self.emitted.add(1, byte_size);
    }

    /// Stages the records seen since the previous checkpoint under `fingerprint`.
    ///
    /// Returns the staged counts, or `None` when nothing was staged because the
    /// fingerprint collided with an unacknowledged one or the stream was
    /// already unreliable.
    pub fn track_state_from_source_at(
        &self,
        fingerprint: Fingerprint,
        received_at: DateTime<Utc>,
    ) -> Option<CountersSnapshot> {
        self.source_states.fetch_add(1, Ordering::Relaxed);

        let mut staged = self.staged.lock();
        let bucket = std::mem::replace(&mut *self.current.write(), Arc::new(StatsCounters::new()));

        if let Some(previous) = staged.previous_received_at {
            staged.to_receive.record(seconds_between(previous, received_at));
        }
        staged.previous_received_at = Some(received_at);

        if self.is_unreliable() {
            return None;
        }

        if staged.in_flight.contains(&fingerprint) {
            warn!(
                stream = %self.key,
                fingerprint = %fingerprint,
                "Source emitted a checkpoint that is already staged; committed stats for this stream are no longer reliable"
            );
            self.metrics.count(TrackerMetric::StateCollisionFromSource, 1);
            self.unreliable.store(true, Ordering::Release);
            staged.queue.clear();
            staged.in_flight.clear();
            return None;
        }

        let counts = bucket.snapshot();
        staged.in_flight.insert(fingerprint);
        staged.queue.push_back(StagedCheckpoint {
            fingerprint,
            counters: bucket,
            received_at,
        });
        Some(counts)
    }

    /// Credits every staged checkpoint up to and including `fingerprint`.
    ///
    /// Returns the credited counts before any rejected records are moved out,
    /// or `None` when the acknowledgment matched nothing.
    pub fn track_state_from_destination_at(
        &self,
        fingerprint: Fingerprint,
        rejected_records: u64,
        committed_at: DateTime<Utc>,
    ) -> Option<CountersSnapshot> {
        self.destination_states.fetch_add(1, Ordering::Relaxed);

        if self.is_unreliable() {
            return None;
        }

        let mut staged = self.staged.lock();
        if staged.queue.is_empty() || !staged.in_flight.contains(&fingerprint) {
            warn!(
                stream = %self.key,
                fingerprint = %fingerprint,
                "Destination acknowledged an unknown checkpoint, ignoring"
            );
            self.metrics.count(TrackerMetric::UnknownStateFromDestination, 1);
            return None;
        }

        let mut credited = CountersSnapshot::default();
        let mut matched_at = None;
        while let Some(entry) = staged.queue.pop_front() {
            staged.in_flight.remove(&entry.fingerprint);
            credited = credited.saturating_add(entry.counters.snapshot());
            if entry.fingerprint == fingerprint {
                matched_at = Some(entry.received_at);
                break;
            }
        }

        if let Some(received_at) = matched_at {
            staged.to_commit.record(seconds_between(received_at, committed_at));
        }
        drop(staged);

        // Rejections only reduce what this ack credits, so committed never goes down.
        let rejected = rejected_records.min(credited.records);
        self.committed.add(credited.records - rejected, credited.bytes);
        if rejected > 0 {
            self.rejected_records.fetch_add(rejected, Ordering::Relaxed);
        }

        debug!(
            stream = %self.key,
            records = credited.records,
            bytes = credited.bytes,
            "Credited committed stats"
        );
        Some(credited)
    }

    /// Replaces the stream's estimate; estimates never accumulate.
    pub fn track_estimate(&self, records: u64, bytes: u64) {
        self.estimated.set(records, bytes);
        self.has_estimate.store(true, Ordering::Release);
    }

    pub fn is_unreliable(&self) -> bool {
        self.unreliable.load(Ordering::Acquire)
    }

    pub fn emitted(&self) -> CountersSnapshot {
        self.emitted.snapshot()
    }

    /// Records seen since this stream's last source checkpoint.
    pub fn pending(&self) -> CountersSnapshot {
        self.current.read().snapshot()
    }

    /// Committed counts, never above emitted; `None` once unreliable.
    pub fn committed(&self) -> Option<CountersSnapshot> {
        if self.is_unreliable() {
            return None;
        }
        Some(self.committed.snapshot().capped_at(self.emitted()))
    }

    pub fn estimated(&self) -> Option<CountersSnapshot> {
        self.has_estimate
            .load(Ordering::Acquire)
            .then(|| self.estimated.snapshot())
    }

    pub fn staged_count(&self) -> usize {
        self.staged.lock().queue.len()
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        let (to_receive, to_commit) = {
            let staged = self.staged.lock();
            (staged.to_receive, staged.to_commit)
        };

        StreamStatsSnapshot {
            emitted: self.emitted(),
            committed: self.committed(),
            estimated: self.estimated(),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
            source_state_count: self.source_states.load(Ordering::Relaxed),
            destination_state_count: self.destination_states.load(Ordering::Relaxed),
            max_seconds_to_receive_source_state: to_receive.max(),
            mean_seconds_to_receive_source_state: to_receive.mean(),
            max_seconds_between_state_and_commit: to_commit.max(),
            mean_seconds_between_state_and_commit: to_commit.mean(),
            unreliable: self.is_unreliable(),
        }
    }
}

impl std::fmt::Debug for StreamStatsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStatsTracker")
            .field("key", &self.key)
            .field("emitted", &self.emitted())
            .field("unreliable", &self.is_unreliable())
            .finish()
    }
}
