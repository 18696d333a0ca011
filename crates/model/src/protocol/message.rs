use super::{state::StateMessage, trace::TraceMessage};
use crate::core::identifiers::StreamKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

/// A single message exchanged with a connector.
///
/// The wire shape is `{"type": "RECORD", "record": {...}}`. Any tag this
/// model does not know about deserializes to [`ConnectorMessage::Unknown`]
/// rather than failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorMessage {
    Record { record: RecordMessage },
    State { state: StateMessage },
    Trace { trace: TraceMessage },
    Control { control: ControlMessage },
    Log { log: LogMessage },
    #[serde(other)]
    Unknown,
}

impl ConnectorMessage {
    pub fn record(record: RecordMessage) -> Self {
        ConnectorMessage::Record { record }
    }

    pub fn state(state: StateMessage) -> Self {
        ConnectorMessage::State { state }
    }

    pub fn trace(trace: TraceMessage) -> Self {
        ConnectorMessage::Trace { trace }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConnectorMessage::Record { .. } => "RECORD",
            ConnectorMessage::State { .. } => "STATE",
            ConnectorMessage::Trace { .. } => "TRACE",
            ConnectorMessage::Control { .. } => "CONTROL",
            ConnectorMessage::Log { .. } => "LOG",
            ConnectorMessage::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub emitted_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<FileReference>,
}

/// Points at a file transferred out of band; its size replaces the record size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_file_url: Option<String>,
    pub file_size_bytes: u64,
}

impl RecordMessage {
    pub fn new(stream: impl Into<String>, namespace: Option<&str>, data: Value) -> Self {
        Self {
            stream: stream.into(),
            namespace: namespace.map(str::to_string),
            data,
            emitted_at: 0,
            file_reference: None,
        }
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.stream.clone(), self.namespace.as_deref())
    }

    /// Bytes attributed to this record: the referenced file size when the
    /// record describes a file transfer, otherwise the serialized JSON length.
    pub fn estimated_byte_size(&self) -> u64 {
        if let Some(file) = &self.file_reference {
            return file.file_size_bytes;
        }

        let mut counter = ByteCounter(0);
        match serde_json::to_writer(&mut counter, &self.data) {
            Ok(()) => counter.0,
            Err(_) => 0,
        }
    }
}

struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    ConnectorConfig,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub control_type: ControlType,
    #[serde(default)]
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_config: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
}
