use crate::error::DeltaTrackerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::{HashMap, HashSet, VecDeque};

const STATE_HASH_BYTES: usize = 4;
const STREAM_INDEX_BYTES: usize = 2;
const RECORD_COUNT_BYTES: usize = 8;
const BYTE_COUNT_BYTES: usize = 8;
const STREAM_ENTRY_BYTES: usize = STREAM_INDEX_BYTES + RECORD_COUNT_BYTES + BYTE_COUNT_BYTES;

/// Records and bytes one stream emitted since the previous checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDelta {
    pub stream_index: u16,
    pub records: u64,
    pub bytes: u64,
}

/// Attributes committed counts to streams by replaying, in order, the deltas
/// staged for each source checkpoint until the acknowledged one is reached.
///
/// Each delta is packed as `hash:u32` followed by `(index:u16, records:u64,
/// bytes:u64)` per stream, and the packed size is charged against a fixed
/// memory budget. Once the budget is exceeded the tracker stops accepting or
/// committing anything for the rest of the attempt.
#[derive(Debug)]
pub struct StateDeltaTracker {
    remaining_capacity: usize,
    capacity_exceeded: bool,
    deltas: VecDeque<Bytes>,
    pending: HashMap<u32, usize>,
    committed_hashes: HashSet<u32>,
    committed_records: HashMap<u16, u64>,
    committed_bytes: HashMap<u16, u64>,
}

impl StateDeltaTracker {
    pub fn new(memory_limit_bytes: usize) -> Self {
        Self {
            remaining_capacity: memory_limit_bytes,
            capacity_exceeded: false,
            deltas: VecDeque::new(),
            pending: HashMap::new(),
            committed_hashes: HashSet::new(),
            committed_records: HashMap::new(),
            committed_bytes: HashMap::new(),
        }
    }

    pub fn add_state(&mut self, hash: u32, deltas: &[StreamDelta]) -> Result<(), DeltaTrackerError> {
        if self.capacity_exceeded {
            return Err(DeltaTrackerError::CapacityExceeded);
        }

        let size = STATE_HASH_BYTES + deltas.len() * STREAM_ENTRY_BYTES;
        if size > self.remaining_capacity {
            self.exceed_capacity();
            return Err(DeltaTrackerError::CapacityExceeded);
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u32(hash);
        for delta in deltas {
            buf.put_u16(delta.stream_index);
            buf.put_u64(delta.records);
            buf.put_u64(delta.bytes);
        }

        self.remaining_capacity -= size;
        self.deltas.push_back(buf.freeze());
        *self.pending.entry(hash).or_default() += 1;
        self.committed_hashes.remove(&hash);
        Ok(())
    }

    pub fn is_pending(&self, hash: u32) -> bool {
        self.pending.contains_key(&hash)
    }

    /// Credits every delta up to and including the oldest one staged under `hash`.
    pub fn commit_state_hash(&mut self, hash: u32) -> Result<(), DeltaTrackerError> {
        if self.capacity_exceeded {
            return Err(DeltaTrackerError::CapacityExceeded);
        }
        if !self.pending.contains_key(&hash) {
            return Err(if self.committed_hashes.contains(&hash) {
                DeltaTrackerError::AlreadyCommitted(hash)
            } else {
                DeltaTrackerError::MissingDelta(hash)
            });
        }

        while let Some(mut delta) = self.deltas.pop_front() {
            self.remaining_capacity += delta.len();
            let delta_hash = delta.get_u32();

            while delta.remaining() >= STREAM_ENTRY_BYTES {
                let index = delta.get_u16();
                *self.committed_records.entry(index).or_default() += delta.get_u64();
                *self.committed_bytes.entry(index).or_default() += delta.get_u64();
            }

            if let Some(count) = self.pending.get_mut(&delta_hash) {
                *count -= 1;
                if *count == 0 {
                    self.pending.remove(&delta_hash);
                }
            }

            if delta_hash == hash {
                self.committed_hashes.insert(hash);
                return Ok(());
            }
        }

        Err(DeltaTrackerError::MissingDelta(hash))
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        self.capacity_exceeded
    }

    pub fn committed_records(&self, stream_index: u16) -> u64 {
        self.committed_records.get(&stream_index).copied().unwrap_or(0)
    }

    pub fn committed_bytes(&self, stream_index: u16) -> u64 {
        self.committed_bytes.get(&stream_index).copied().unwrap_or(0)
    }

    fn exceed_capacity(&mut self) {
        self.capacity_exceeded = true;
        self.deltas.clear();
        self.pending.clear();
    }
}
