use crate::config::BookkeepingConfig;
use crate::stats::SyncStatsTracker;
use crate::status::{StatusEventSender, StreamStatusEvent};
use chrono::{DateTime, Utc};
use model::core::context::{MessageOrigin, ReplicationContext};
use model::core::identifiers::{StreamDescriptor, StreamKey};
use model::protocol::{
    ConnectorMessage, ErrorTrace, FailureType, StateMessage, StreamStatusTrace, TraceKind,
    TraceMessage,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure synthesized from the error traces connectors reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReason {
    pub origin: MessageOrigin,
    pub failure_type: Option<FailureType>,
    pub message: String,
    pub internal_message: Option<String>,
    pub stack_trace: Option<String>,
    pub stream: Option<StreamDescriptor>,
    pub emitted_at: f64,
}

#[derive(Debug, Clone)]
struct ReportedError {
    emitted_at: f64,
    error: ErrorTrace,
}

#[derive(Default)]
struct OriginState {
    errors: Vec<ReportedError>,
    last_state: Option<StateMessage>,
}

/// Entry point for every message crossing the worker during one attempt.
///
/// Records, checkpoints and estimates feed the sync stats tracker, error
/// traces are collected per origin, and stream status traces are forwarded to
/// the status worker when one is attached. Nothing here fails the sync.
pub struct MessageTracker {
    context: ReplicationContext,
    stats: Arc<dyn SyncStatsTracker>,
    source: Mutex<OriginState>,
    destination: Mutex<OriginState>,
    log_connector_messages: bool,
    status_events: Option<StatusEventSender>,
}

impl MessageTracker {
    pub fn new(
        context: ReplicationContext,
        stats: Arc<dyn SyncStatsTracker>,
        config: &BookkeepingConfig,
    ) -> Self {
        Self {
            context,
            stats,
            source: Mutex::new(OriginState::default()),
            destination: Mutex::new(OriginState::default()),
            log_connector_messages: config.log_connector_messages,
            status_events: None,
        }
    }

    pub fn with_status_events(mut self, sender: StatusEventSender) -> Self {
        self.status_events = Some(sender);
        self
    }

    pub fn context(&self) -> &ReplicationContext {
        &self.context
    }

    pub fn stats(&self) -> &Arc<dyn SyncStatsTracker> {
        &self.stats
    }

    pub fn accept_from_source(&self, message: &ConnectorMessage) {
        self.log_message(MessageOrigin::Source, message);

        match message {
            ConnectorMessage::Record { record } => self.stats.update_stats(record),
            ConnectorMessage::State { state } => {
                self.stats.update_source_states_stats(state);
                self.source.lock().last_state = Some(state.clone());
            }
            ConnectorMessage::Trace { trace } => self.handle_trace(MessageOrigin::Source, trace),
            ConnectorMessage::Control { .. } => {
                debug!(origin = "source", "Control message handled elsewhere");
            }
            ConnectorMessage::Log { .. } => {}
            ConnectorMessage::Unknown => {
                warn!(origin = "source", "Ignoring message of unknown type");
            }
        }
    }

    pub fn accept_from_destination(&self, message: &ConnectorMessage) {
        self.log_message(MessageOrigin::Destination, message);

        match message {
            ConnectorMessage::State { state } => {
                self.stats.update_destination_state_stats(state);
                self.destination.lock().last_state = Some(state.clone());
            }
            ConnectorMessage::Trace { trace } => {
                self.handle_trace(MessageOrigin::Destination, trace)
            }
            ConnectorMessage::Control { .. } => {
                debug!(origin = "destination", "Control message handled elsewhere");
            }
            ConnectorMessage::Log { .. } => {}
            ConnectorMessage::Record { .. } | ConnectorMessage::Unknown => {
                warn!(
                    origin = "destination",
                    message_type = message.type_name(),
                    "Ignoring unexpected message"
                );
            }
        }
    }

    fn handle_trace(&self, origin: MessageOrigin, trace: &TraceMessage) {
        match &trace.kind {
            TraceKind::Estimate { estimate } => {
                if let Err(e) = self.stats.update_estimates(estimate) {
                    warn!(origin = %origin, error = %e, "Rejected estimate");
                }
            }
            TraceKind::Error { error } => {
                let state = match origin {
                    MessageOrigin::Destination => &self.destination,
                    _ => &self.source,
                };
                state.lock().errors.push(ReportedError {
                    emitted_at: trace.emitted_at,
                    error: error.clone(),
                });
            }
            TraceKind::StreamStatus { stream_status } => {
                self.forward_status(origin, trace.emitted_at, stream_status)
            }
            TraceKind::Analytics { .. } => {
                debug!(origin = %origin, "Analytics trace received");
            }
            TraceKind::Unknown => {
                warn!(origin = %origin, "Ignoring trace of unknown type");
            }
        }
    }

    fn forward_status(&self, origin: MessageOrigin, emitted_at: f64, trace: &StreamStatusTrace) {
        let Some(sender) = &self.status_events else {
            return;
        };

        let transitioned_at =
            DateTime::<Utc>::from_timestamp_millis(emitted_at as i64).unwrap_or_else(Utc::now);
        let event = StreamStatusEvent::new(
            self.context,
            origin,
            StreamKey::from(&trace.stream_descriptor),
            trace.status,
            transitioned_at,
        );
        if sender.send(event).is_err() {
            warn!(
                origin = %origin,
                stream = %trace.stream_descriptor.name,
                "Status worker is gone; dropping stream status"
            );
        }
    }

    fn log_message(&self, origin: MessageOrigin, message: &ConnectorMessage) {
        if !self.log_connector_messages {
            return;
        }
        match serde_json::to_string(message) {
            Ok(json) => debug!(origin = %origin, message = %json, "Connector message"),
            Err(e) => debug!(origin = %origin, error = %e, "Unserializable connector message"),
        }
    }

    pub fn source_output_state(&self) -> Option<StateMessage> {
        self.source.lock().last_state.clone()
    }

    pub fn destination_output_state(&self) -> Option<StateMessage> {
        self.destination.lock().last_state.clone()
    }

    pub fn first_source_error_trace(&self) -> Option<ErrorTrace> {
        self.source.lock().errors.first().map(|e| e.error.clone())
    }

    pub fn first_destination_error_trace(&self) -> Option<ErrorTrace> {
        self.destination.lock().errors.first().map(|e| e.error.clone())
    }

    pub fn has_error_traces(&self) -> bool {
        !self.source.lock().errors.is_empty() || !self.destination.lock().errors.is_empty()
    }

    /// The earlier of the two origins' first errors, or whichever exists.
    pub fn error_trace_failure_reason(&self) -> Option<FailureReason> {
        let source = self.source.lock().errors.first().cloned();
        let destination = self.destination.lock().errors.first().cloned();

        let (origin, reported) = match (source, destination) {
            (Some(s), Some(d)) if d.emitted_at < s.emitted_at => (MessageOrigin::Destination, d),
            (Some(s), _) => (MessageOrigin::Source, s),
            (None, Some(d)) => (MessageOrigin::Destination, d),
            (None, None) => return None,
        };

        Some(FailureReason {
            origin,
            failure_type: reported.error.failure_type,
            message: reported.error.message,
            internal_message: reported.error.internal_message,
            stack_trace: reported.error.stack_trace,
            stream: reported.error.stream_descriptor,
            emitted_at: reported.emitted_at,
        })
    }
}
