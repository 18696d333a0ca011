use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic (records, bytes) pair.
#[derive(Debug, Default)]
pub struct StatsCounters {
    records: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub records: u64,
    pub bytes: u64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, records: u64, bytes: u64) {
        self.records.fetch_add(records, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Overwrites both values; used for estimates, which replace rather than accumulate.
    pub fn set(&self, records: u64, bytes: u64) {
        self.records.store(records, Ordering::Relaxed);
        self.bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            records: self.records(),
            bytes: self.bytes(),
        }
    }
}

impl CountersSnapshot {
    pub fn new(records: u64, bytes: u64) -> Self {
        Self { records, bytes }
    }

    pub fn saturating_add(self, other: CountersSnapshot) -> Self {
        Self {
            records: self.records.saturating_add(other.records),
            bytes: self.bytes.saturating_add(other.bytes),
        }
    }

    /// Component-wise minimum.
    pub fn capped_at(self, ceiling: CountersSnapshot) -> Self {
        Self {
            records: self.records.min(ceiling.records),
            bytes: self.bytes.min(ceiling.bytes),
        }
    }
}
