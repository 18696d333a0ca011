pub mod message;
pub mod state;
pub mod trace;

pub use message::{ConnectorMessage, ControlMessage, ControlType, FileReference, LogMessage, RecordMessage};
pub use state::{GlobalState, StateMessage, StateStats, StateType, StreamState};
pub use trace::{
    ErrorTrace, EstimateTrace, EstimateType, FailureType, StreamStatusKind, StreamStatusTrace,
    TraceKind, TraceMessage,
};
