//! Stream status state machine, its persistence collaborator and the worker
//! task that drives it.

pub mod models;
pub mod store;
pub mod tracker;
pub mod worker;

pub use models::{
    CurrentStreamStatus, IncompleteRunCause, JobType, StreamRunState, StreamStatusCreate,
    StreamStatusEvent, StreamStatusKey, StreamStatusUpdate,
};
pub use store::{InMemoryStatusStore, RetryingStatusStore, StoredStreamStatus, StreamStatusStore};
pub use tracker::StreamStatusTracker;
pub use worker::{StatusEventSender, spawn_status_worker};
