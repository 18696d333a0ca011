use super::{SecondsStat, seconds_between};
use crate::error::StateTimingError;
use chrono::{DateTime, Utc};
use model::core::identifiers::StreamKey;
use model::protocol::{StateMessage, StateType};
use std::collections::{HashMap, VecDeque};

type StagedTime = (u32, DateTime<Utc>);

/// Checkpoint timing for the sequential strategy.
///
/// Keeps `(hash, received_at)` per stream for STREAM checkpoints and in one
/// shared queue for every other scope, bounded by a message count. Failing
/// to match or running out of room only affects timing, never counts.
#[derive(Debug)]
pub struct StateMetricsTracker {
    remaining_capacity: usize,
    capacity_exceeded: bool,
    per_stream: HashMap<StreamKey, VecDeque<StagedTime>>,
    global: VecDeque<StagedTime>,
    first_record_received_at: Option<DateTime<Utc>>,
    last_state_received_at: Option<DateTime<Utc>>,
    to_receive: SecondsStat,
    to_commit: SecondsStat,
    source_states: u64,
    destination_states: u64,
}

impl StateMetricsTracker {
    pub fn new(message_limit: usize) -> Self {
        Self {
            remaining_capacity: message_limit,
            capacity_exceeded: false,
            per_stream: HashMap::new(),
            global: VecDeque::new(),
            first_record_received_at: None,
            last_state_received_at: None,
            to_receive: SecondsStat::default(),
            to_commit: SecondsStat::default(),
            source_states: 0,
            destination_states: 0,
        }
    }

    pub fn record_first_record(&mut self, at: DateTime<Utc>) {
        self.first_record_received_at.get_or_insert(at);
    }

    pub fn add_state(
        &mut self,
        state: &StateMessage,
        hash: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StateTimingError> {
        self.source_states += 1;

        if let Some(previous) = self.last_state_received_at.or(self.first_record_received_at) {
            self.to_receive.record(seconds_between(previous, at));
        }
        self.last_state_received_at = Some(at);

        if self.capacity_exceeded {
            return Err(StateTimingError::CapacityExceeded);
        }
        if self.remaining_capacity == 0 {
            self.capacity_exceeded = true;
            self.per_stream.clear();
            self.global.clear();
            return Err(StateTimingError::CapacityExceeded);
        }

        self.queue_for(state).push_back((hash, at));
        self.remaining_capacity -= 1;
        Ok(())
    }

    /// Matches a destination checkpoint and records emitted-to-committed time
    /// from the matched entry. Older entries in the same queue are dropped.
    pub fn update_states(
        &mut self,
        state: &StateMessage,
        hash: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StateTimingError> {
        self.destination_states += 1;

        if self.capacity_exceeded {
            return Err(StateTimingError::CapacityExceeded);
        }

        let queue = self.queue_for(state);
        if !queue.iter().any(|(staged, _)| *staged == hash) {
            return Err(StateTimingError::NoStateMatch(hash));
        }

        let mut released = 0;
        let mut matched_at = None;
        while let Some((staged, received_at)) = queue.pop_front() {
            released += 1;
            if staged == hash {
                matched_at = Some(received_at);
                break;
            }
        }

        self.remaining_capacity += released;
        if let Some(received_at) = matched_at {
            self.to_commit.record(seconds_between(received_at, at));
        }
        Ok(())
    }

    fn queue_for(&mut self, state: &StateMessage) -> &mut VecDeque<StagedTime> {
        match (&state.state_type, &state.stream) {
            (StateType::Stream, Some(stream)) => self
                .per_stream
                .entry(StreamKey::from(&stream.stream_descriptor))
                .or_default(),
            _ => &mut self.global,
        }
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        self.capacity_exceeded
    }

    pub fn source_state_count(&self) -> u64 {
        self.source_states
    }

    pub fn destination_state_count(&self) -> u64 {
        self.destination_states
    }

    pub fn max_seconds_to_receive_state(&self) -> Option<u64> {
        self.to_receive.max()
    }

    pub fn mean_seconds_to_receive_state(&self) -> Option<f64> {
        self.to_receive.mean()
    }

    pub fn max_seconds_between_emitted_and_committed(&self) -> Option<u64> {
        self.to_commit.max()
    }

    pub fn mean_seconds_between_emitted_and_committed(&self) -> Option<f64> {
        self.to_commit.mean()
    }
}
