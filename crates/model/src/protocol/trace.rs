use crate::core::identifiers::{StreamDescriptor, StreamKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    /// Milliseconds since the epoch, as reported by the connector.
    #[serde(default)]
    pub emitted_at: f64,
    #[serde(flatten)]
    pub kind: TraceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceKind {
    Error { error: ErrorTrace },
    Estimate { estimate: EstimateTrace },
    StreamStatus { stream_status: StreamStatusTrace },
    Analytics { analytics: Value },
    #[serde(other)]
    Unknown,
}

impl TraceMessage {
    pub fn error(emitted_at: f64, error: ErrorTrace) -> Self {
        Self {
            emitted_at,
            kind: TraceKind::Error { error },
        }
    }

    pub fn estimate(emitted_at: f64, estimate: EstimateTrace) -> Self {
        Self {
            emitted_at,
            kind: TraceKind::Estimate { estimate },
        }
    }

    pub fn stream_status(emitted_at: f64, stream_status: StreamStatusTrace) -> Self {
        Self {
            emitted_at,
            kind: TraceKind::StreamStatus { stream_status },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    SystemError,
    ConfigError,
    TransientError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrace {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_descriptor: Option<StreamDescriptor>,
}

impl ErrorTrace {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            internal_message: None,
            stack_trace: None,
            failure_type: None,
            stream_descriptor: None,
        }
    }
}

/// Granularity of a connector-supplied estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateType {
    Stream,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateTrace {
    #[serde(rename = "type")]
    pub estimate_type: EstimateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_estimate: Option<u64>,
}

impl EstimateTrace {
    pub fn for_stream(name: &str, namespace: Option<&str>, rows: u64, bytes: u64) -> Self {
        Self {
            estimate_type: EstimateType::Stream,
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            row_estimate: Some(rows),
            byte_estimate: Some(bytes),
        }
    }

    pub fn for_sync(rows: u64, bytes: u64) -> Self {
        Self {
            estimate_type: EstimateType::Sync,
            name: None,
            namespace: None,
            row_estimate: Some(rows),
            byte_estimate: Some(bytes),
        }
    }

    pub fn stream_key(&self) -> StreamKey {
        match &self.name {
            Some(name) => StreamKey::new(name.clone(), self.namespace.as_deref()),
            None => StreamKey::unnamed(),
        }
    }
}

/// Per-stream lifecycle status as reported by one side of the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatusKind {
    Started,
    Running,
    Complete,
    Incomplete,
}

impl StreamStatusKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatusKind::Complete | StreamStatusKind::Incomplete)
    }
}

impl fmt::Display for StreamStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatusKind::Started => "STARTED",
            StreamStatusKind::Running => "RUNNING",
            StreamStatusKind::Complete => "COMPLETE",
            StreamStatusKind::Incomplete => "INCOMPLETE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatusTrace {
    pub stream_descriptor: StreamDescriptor,
    pub status: StreamStatusKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectorMessage;

    #[test]
    fn parses_nested_trace_kinds() {
        let msg: ConnectorMessage = serde_json::from_str(
            r#"{"type":"TRACE","trace":{"type":"ESTIMATE","emitted_at":10.0,
                "estimate":{"type":"SYNC","row_estimate":100,"byte_estimate":2048}}}"#,
        )
        .unwrap();

        let ConnectorMessage::Trace { trace } = msg else {
            panic!("expected a trace");
        };
        assert_eq!(trace.emitted_at, 10.0);
        assert_eq!(
            trace.kind,
            TraceKind::Estimate {
                estimate: EstimateTrace::for_sync(100, 2048)
            }
        );
    }

    #[test]
    fn unknown_trace_kind_is_tolerated() {
        let trace: TraceMessage =
            serde_json::from_str(r#"{"type":"SOMETHING_NEW","emitted_at":1.0}"#).unwrap();
        assert_eq!(trace.kind, TraceKind::Unknown);
    }

    #[test]
    fn parses_stream_status() {
        let trace: TraceMessage = serde_json::from_str(
            r#"{"type":"STREAM_STATUS","emitted_at":5.0,
                "stream_status":{"stream_descriptor":{"name":"users"},"status":"RUNNING"}}"#,
        )
        .unwrap();

        match trace.kind {
            TraceKind::StreamStatus { stream_status } => {
                assert_eq!(stream_status.status, StreamStatusKind::Running);
                assert_eq!(stream_status.stream_descriptor.name, "users");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
