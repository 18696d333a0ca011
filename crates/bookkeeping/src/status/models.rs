use chrono::{DateTime, Utc};
use model::core::context::{MessageOrigin, ReplicationContext};
use model::core::identifiers::StreamKey;
use model::protocol::StreamStatusKind;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Externally visible status of a stream within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamRunState {
    Pending,
    Running,
    Complete,
    Incomplete,
}

impl StreamRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamRunState::Complete | StreamRunState::Incomplete)
    }
}

impl fmt::Display for StreamRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamRunState::Pending => "PENDING",
            StreamRunState::Running => "RUNNING",
            StreamRunState::Complete => "COMPLETE",
            StreamRunState::Incomplete => "INCOMPLETE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncompleteRunCause {
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Sync,
    Reset,
}

impl From<&ReplicationContext> for JobType {
    fn from(context: &ReplicationContext) -> Self {
        if context.is_reset {
            JobType::Reset
        } else {
            JobType::Sync
        }
    }
}

/// Live-map key: one stream within one attempt of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamStatusKey {
    pub stream: StreamKey,
    pub workspace_id: Uuid,
    pub connection_id: Uuid,
    pub job_id: i64,
    pub attempt: i32,
}

impl StreamStatusKey {
    pub fn new(context: &ReplicationContext, stream: StreamKey) -> Self {
        Self {
            stream,
            workspace_id: context.workspace_id,
            connection_id: context.connection_id,
            job_id: context.job_id,
            attempt: context.attempt,
        }
    }

    pub fn belongs_to(&self, context: &ReplicationContext) -> bool {
        self.workspace_id == context.workspace_id
            && self.connection_id == context.connection_id
            && self.job_id == context.job_id
            && self.attempt == context.attempt
    }
}

/// In-memory record for a live stream: each side's last reported status
/// plus the status last written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentStreamStatus {
    pub status_id: Option<Uuid>,
    pub source: Option<StreamStatusKind>,
    pub destination: Option<StreamStatusKind>,
    pub run_state: StreamRunState,
}

impl CurrentStreamStatus {
    pub(crate) fn started(origin: MessageOrigin) -> Self {
        let mut status = Self {
            status_id: None,
            source: None,
            destination: None,
            run_state: StreamRunState::Pending,
        };
        status.set(origin, StreamStatusKind::Started);
        status
    }

    pub(crate) fn set(&mut self, origin: MessageOrigin, status: StreamStatusKind) {
        match origin {
            MessageOrigin::Source => self.source = Some(status),
            MessageOrigin::Destination => self.destination = Some(status),
            MessageOrigin::Internal => {
                self.source = Some(status);
                self.destination = Some(status);
            }
        }
    }

    /// The destination's view once it has reported anything, else the source's.
    pub fn current(&self) -> Option<StreamStatusKind> {
        self.destination.or(self.source)
    }

    pub fn is_complete(&self) -> bool {
        self.source == Some(StreamStatusKind::Complete)
            && self.destination == Some(StreamStatusKind::Complete)
    }

    pub fn is_terminal(&self) -> bool {
        let terminal = |side: Option<StreamStatusKind>| side.is_some_and(|s| s.is_terminal());
        terminal(self.source) && terminal(self.destination)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatusCreate {
    pub workspace_id: Uuid,
    pub connection_id: Uuid,
    pub job_id: i64,
    pub attempt: i32,
    pub stream_name: String,
    pub stream_namespace: Option<String>,
    pub job_type: JobType,
    pub run_state: StreamRunState,
    pub transitioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatusUpdate {
    pub id: Uuid,
    pub job_type: JobType,
    pub run_state: StreamRunState,
    pub incomplete_cause: Option<IncompleteRunCause>,
    pub transitioned_at: DateTime<Utc>,
}

/// A stream status change reported by a connector, or synthesized by the
/// worker with [`MessageOrigin::Internal`] to close out the whole attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatusEvent {
    pub context: ReplicationContext,
    pub origin: MessageOrigin,
    pub stream: StreamKey,
    pub status: StreamStatusKind,
    pub transitioned_at: DateTime<Utc>,
}

impl StreamStatusEvent {
    pub fn new(
        context: ReplicationContext,
        origin: MessageOrigin,
        stream: StreamKey,
        status: StreamStatusKind,
        transitioned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            context,
            origin,
            stream,
            status,
            transitioned_at,
        }
    }

    /// Sync-level event that forces every live stream of the attempt to `status`.
    pub fn sync_level(
        context: ReplicationContext,
        status: StreamStatusKind,
        transitioned_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            context,
            MessageOrigin::Internal,
            StreamKey::unnamed(),
            status,
            transitioned_at,
        )
    }

    pub fn key(&self) -> StreamStatusKey {
        StreamStatusKey::new(&self.context, self.stream.clone())
    }
}
