use model::core::{context::MessageOrigin, identifiers::StreamKey};
use model::protocol::StreamStatusKind;
use thiserror::Error;

/// Raised when a stream status event cannot be applied to the live record.
///
/// Callers are expected to log and drop the event; none of these variants
/// should ever abort the sync itself.
#[derive(Error, Debug)]
pub enum StreamStatusError {
    #[error("Invalid stream status transition to {status} from {origin} for stream '{stream}'")]
    InvalidTransition {
        status: StreamStatusKind,
        origin: MessageOrigin,
        stream: StreamKey,
    },

    #[error("Stream status id not present to update stream '{stream}'")]
    MissingStatusId { stream: StreamKey },

    #[error("Failed to persist status for stream '{stream}': {source}")]
    Store {
        stream: StreamKey,
        #[source]
        source: StatusStoreError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimateError {
    #[error("STREAM and SYNC estimates should not be emitted in the same sync")]
    MixedEstimateTypes,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaTrackerError {
    #[error("Memory capacity is exceeded for the state delta tracker")]
    CapacityExceeded,

    #[error("State hash {0} was already committed, likely indicating a state hash collision")]
    AlreadyCommitted(u32),

    #[error("Delta was not stored for state hash {0}")]
    MissingDelta(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTimingError {
    #[error("State timing tracker reached its message limit")]
    CapacityExceeded,

    #[error("No source state matches destination state hash {0}")]
    NoStateMatch(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusStoreError {
    /// The store could not be reached; safe to retry.
    #[error("Status store unavailable: {0}")]
    Unavailable(String),

    #[error("Status store rejected the request: {0}")]
    Rejected(String),

    #[error("Unknown stream status id {0}")]
    UnknownStatus(uuid::Uuid),

    #[error("Retry attempts exhausted: {0}")]
    RetriesExhausted(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}
