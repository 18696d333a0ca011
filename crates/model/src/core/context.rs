use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which side of the replication produced a message.
///
/// `Internal` is reserved for events the worker synthesizes itself, such as
/// the sync-level completion that forces every live stream to a final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageOrigin {
    Source,
    Destination,
    Internal,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOrigin::Source => "source",
            MessageOrigin::Destination => "destination",
            MessageOrigin::Internal => "internal",
        }
    }
}

impl fmt::Display for MessageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the sync attempt a tracker instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicationContext {
    pub workspace_id: Uuid,
    pub connection_id: Uuid,
    pub job_id: i64,
    pub attempt: i32,
    #[serde(default)]
    pub is_reset: bool,
}

impl ReplicationContext {
    pub fn new(workspace_id: Uuid, connection_id: Uuid, job_id: i64, attempt: i32) -> Self {
        Self {
            workspace_id,
            connection_id,
            job_id,
            attempt,
            is_reset: false,
        }
    }

    pub fn with_reset(mut self, is_reset: bool) -> Self {
        self.is_reset = is_reset;
        self
    }
}

impl fmt::Display for ReplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection={} job={} attempt={}",
            self.connection_id, self.job_id, self.attempt
        )
    }
}
