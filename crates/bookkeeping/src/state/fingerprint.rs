use model::protocol::{StateMessage, StateType};
use serde::Serialize;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Identity of a checkpoint, derived from its scope payload only.
///
/// Source and destination stats attached to the message are excluded, so the
/// destination's echo of a checkpoint hashes to the same value. Two different
/// checkpoints may still collide; callers treat that as an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(state: &StateMessage) -> Self {
        // serde_json objects are key-sorted, so equal payloads encode identically.
        let encoded = match state.state_type {
            StateType::Stream => serde_json::to_vec(&state.stream),
            StateType::Global => serde_json::to_vec(&state.global),
            StateType::Legacy => serde_json::to_vec(&state.data),
        };
        Self(xxh3_64(&encoded.unwrap_or_default()))
    }

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Fixed-width form used by the sequential strategy's shared structures.
    pub fn short(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
