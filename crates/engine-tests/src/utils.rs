#![allow(dead_code)]

use model::core::identifiers::StreamDescriptor;
use model::protocol::{
    ConnectorMessage, ErrorTrace, EstimateTrace, FailureType, RecordMessage,
    StateMessage, StateStats, StreamState, StreamStatusKind, StreamStatusTrace, TraceMessage,
};
use serde_json::json;

pub fn record(stream: &str, id: u64) -> ConnectorMessage {
    ConnectorMessage::record(RecordMessage::new(
        stream,
        Some("public"),
        json!({ "id": id, "payload": format!("row-{id}") }),
    ))
}

pub fn stream_state(stream: &str, cursor: u64) -> ConnectorMessage {
    ConnectorMessage::state(stream_checkpoint(stream, cursor))
}

pub fn stream_checkpoint(stream: &str, cursor: u64) -> StateMessage {
    StateMessage::for_stream(
        StreamDescriptor::new(stream, Some("public")),
        json!({ "cursor": cursor }),
    )
}

pub fn counted_stream_state(stream: &str, cursor: u64, records: u64) -> ConnectorMessage {
    ConnectorMessage::state(
        stream_checkpoint(stream, cursor).with_source_stats(StateStats::with_record_count(records as f64)),
    )
}

pub fn global_state(streams: &[&str], lsn: u64) -> ConnectorMessage {
    ConnectorMessage::state(StateMessage::for_global(
        Some(json!({ "lsn": lsn })),
        streams
            .iter()
            .map(|name| StreamState {
                stream_descriptor: StreamDescriptor::new(*name, Some("public")),
                stream_state: Some(json!({ "lsn": lsn })),
            })
            .collect(),
    ))
}

pub fn status(stream: &str, kind: StreamStatusKind, emitted_at: f64) -> ConnectorMessage {
    ConnectorMessage::trace(TraceMessage::stream_status(
        emitted_at,
        StreamStatusTrace {
            stream_descriptor: StreamDescriptor::new(stream, Some("public")),
            status: kind,
        },
    ))
}

pub fn error(message: &str, failure_type: FailureType, emitted_at: f64) -> ConnectorMessage {
    let mut trace = ErrorTrace::new(message);
    trace.failure_type = Some(failure_type);
    ConnectorMessage::trace(TraceMessage::error(emitted_at, trace))
}

pub fn stream_estimate(stream: &str, rows: u64, bytes: u64) -> ConnectorMessage {
    ConnectorMessage::trace(TraceMessage::estimate(
        0.0,
        EstimateTrace::for_stream(stream, Some("public"), rows, bytes),
    ))
}

pub fn sync_estimate(rows: u64, bytes: u64) -> ConnectorMessage {
    ConnectorMessage::trace(TraceMessage::estimate(0.0, EstimateTrace::for_sync(rows, bytes)))
}
