use crate::core::identifiers::{StreamDescriptor, StreamKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope a checkpoint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    Stream,
    Global,
    #[default]
    Legacy,
}

/// Record counts a connector attaches to a checkpoint for cross-checking.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_record_count: Option<f64>,
}

impl StateStats {
    pub fn with_record_count(record_count: f64) -> Self {
        Self {
            record_count: Some(record_count),
            rejected_record_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<Value>,
    #[serde(default)]
    pub stream_states: Vec<StreamState>,
}

/// Checkpoint emitted by a source and echoed back by the destination once the
/// records preceding it are durable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateMessage {
    #[serde(rename = "type", default)]
    pub state_type: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stats: Option<StateStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_stats: Option<StateStats>,
}

impl StateMessage {
    pub fn for_stream(descriptor: StreamDescriptor, state: Value) -> Self {
        Self {
            state_type: StateType::Stream,
            stream: Some(StreamState {
                stream_descriptor: descriptor,
                stream_state: Some(state),
            }),
            ..Default::default()
        }
    }

    pub fn for_global(shared_state: Option<Value>, stream_states: Vec<StreamState>) -> Self {
        Self {
            state_type: StateType::Global,
            global: Some(GlobalState {
                shared_state,
                stream_states,
            }),
            ..Default::default()
        }
    }

    pub fn legacy(data: Value) -> Self {
        Self {
            state_type: StateType::Legacy,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn with_source_stats(mut self, stats: StateStats) -> Self {
        self.source_stats = Some(stats);
        self
    }

    pub fn with_destination_stats(mut self, stats: StateStats) -> Self {
        self.destination_stats = Some(stats);
        self
    }

    /// Streams this checkpoint covers.
    ///
    /// STREAM checkpoints cover their own stream, GLOBAL checkpoints every
    /// stream listed in the global block. LEGACY checkpoints, and scoped ones
    /// missing their scope block, fall back to the unnamed key.
    pub fn stream_keys(&self) -> Vec<StreamKey> {
        match self.state_type {
            StateType::Stream => match &self.stream {
                Some(stream) => vec![StreamKey::from(&stream.stream_descriptor)],
                None => vec![StreamKey::unnamed()],
            },
            StateType::Global => match &self.global {
                Some(global) if !global.stream_states.is_empty() => global
                    .stream_states
                    .iter()
                    .map(|s| StreamKey::from(&s.stream_descriptor))
                    .collect(),
                _ => vec![StreamKey::unnamed()],
            },
            StateType::Legacy => vec![StreamKey::unnamed()],
        }
    }
}
