use crate::error::CliError;
use bookkeeping::{
    config::BookkeepingConfig,
    message_tracker::{FailureReason, MessageTracker},
    metrics::{TrackerMetrics, TrackerMetricsSnapshot},
    stats::{StreamSyncStats, SyncStats, build_stats_tracker},
    status::{
        InMemoryStatusStore, RetryingStatusStore, StreamStatusEvent, StreamStatusTracker,
        spawn_status_worker,
    },
};
use chrono::Utc;
use model::core::{context::ReplicationContext, context::MessageOrigin};
use model::protocol::{ConnectorMessage, StreamStatusKind};
use serde::Serialize;
use std::{path::Path, sync::Arc};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

const ECHO_CHANNEL_CAPACITY: usize = 1024;

/// Where the destination side of the replay comes from.
pub enum DestinationInput<R> {
    /// Messages the destination actually emitted.
    Recorded(R),
    /// Acknowledge every source checkpoint as soon as it is tracked.
    EchoSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub stream_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_namespace: Option<String>,
    pub run_state: String,
    pub transitions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub context: ReplicationContext,
    pub cancelled: bool,
    pub final_status: StreamStatusKind,
    pub source_messages: u64,
    pub destination_messages: u64,
    pub totals: SyncStats,
    pub streams: Vec<StreamSyncStats>,
    pub unreliable_committed_counts: bool,
    pub unreliable_state_timing_metrics: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub statuses: Vec<StatusRow>,
    pub metrics: TrackerMetricsSnapshot,
}

impl ReplayReport {
    pub fn succeeded(&self) -> bool {
        self.final_status == StreamStatusKind::Complete
    }
}

pub async fn replay_files(
    source: &Path,
    destination: Option<&Path>,
    context: ReplicationContext,
    config: &BookkeepingConfig,
    completed: bool,
    cancel: CancellationToken,
) -> Result<ReplayReport, CliError> {
    let source = BufReader::new(File::open(source).await?);
    let destination = match destination {
        Some(path) => DestinationInput::Recorded(BufReader::new(File::open(path).await?)),
        None => DestinationInput::EchoSource,
    };
    replay(source, destination, context, config, completed, cancel).await
}

/// Feeds both sides of an attempt concurrently, then closes every stream out
/// with a sync-level status and collects the report.
pub async fn replay<S, D>(
    source: S,
    destination: DestinationInput<D>,
    context: ReplicationContext,
    config: &BookkeepingConfig,
    completed: bool,
    cancel: CancellationToken,
) -> Result<ReplayReport, CliError>
where
    S: AsyncBufRead + Unpin + Send + 'static,
    D: AsyncBufRead + Unpin + Send + 'static,
{
    let metrics = TrackerMetrics::new();
    let store = RetryingStatusStore::new(InMemoryStatusStore::new(), config.status_retry.clone());
    let statuses = Arc::new(StreamStatusTracker::new(store, Arc::new(metrics.clone())));
    let (events, worker) = spawn_status_worker(Arc::clone(&statuses));

    let stats = build_stats_tracker(config, Arc::new(metrics.clone()));
    let messages =
        Arc::new(MessageTracker::new(context, stats, config).with_status_events(events.clone()));

    info!(%context, strategy = %config.strategy, "Starting replay");

    let (echo, destination_task) = match destination {
        DestinationInput::Recorded(reader) => {
            let task = tokio::spawn(
                feed(
                    reader,
                    MessageOrigin::Destination,
                    Arc::clone(&messages),
                    None,
                    cancel.clone(),
                )
                .in_current_span(),
            );
            (None, task)
        }
        DestinationInput::EchoSource => {
            let (tx, rx) = mpsc::channel(ECHO_CHANNEL_CAPACITY);
            let task =
                tokio::spawn(echo_checkpoints(rx, Arc::clone(&messages)).in_current_span());
            (Some(tx), task)
        }
    };
    let source_task = tokio::spawn(
        feed(
            source,
            MessageOrigin::Source,
            Arc::clone(&messages),
            echo,
            cancel.clone(),
        )
        .in_current_span(),
    );

    let source_messages = source_task.await??;
    let destination_messages = destination_task.await??;

    let cancelled = cancel.is_cancelled();
    let final_status = if cancelled || messages.has_error_traces() {
        StreamStatusKind::Incomplete
    } else {
        StreamStatusKind::Complete
    };

    if events
        .send(StreamStatusEvent::sync_level(context, final_status, Utc::now()))
        .is_err()
    {
        warn!("Status worker stopped before the attempt was closed out");
    }
    drop(events);

    let failure_reason = messages.error_trace_failure_reason();
    let stats = Arc::clone(messages.stats());
    drop(messages);
    worker.await?;

    info!(
        source_messages,
        destination_messages,
        status = %final_status,
        "Replay finished"
    );

    let has_replication_completed = completed && !cancelled;
    Ok(ReplayReport {
        context,
        cancelled,
        final_status,
        source_messages,
        destination_messages,
        totals: stats.total_stats(has_replication_completed),
        streams: stats.per_stream_stats(has_replication_completed),
        unreliable_committed_counts: stats.unreliable_committed_counts(),
        unreliable_state_timing_metrics: stats.unreliable_state_timing_metrics(),
        failure_reason,
        statuses: statuses
            .store()
            .inner()
            .all()
            .into_iter()
            .map(|status| StatusRow {
                run_state: status.run_state().to_string(),
                transitions: status.history.len(),
                stream_name: status.created.stream_name,
                stream_namespace: status.created.stream_namespace,
            })
            .collect(),
        metrics: metrics.snapshot(),
    })
}

/// Reads one side's JSON lines until EOF or cancellation. Source checkpoints
/// are forwarded to `echo` once tracked.
async fn feed<R>(
    reader: R,
    origin: MessageOrigin,
    messages: Arc<MessageTracker>,
    echo: Option<mpsc::Sender<ConnectorMessage>>,
    cancel: CancellationToken,
) -> Result<u64, CliError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    let mut accepted = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(%origin, accepted, "Replay cancelled");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        line_no += 1;

        let Some(message) = parse_line(origin, line_no, &line) else {
            continue;
        };

        match origin {
            MessageOrigin::Destination => messages.accept_from_destination(&message),
            _ => messages.accept_from_source(&message),
        }
        accepted += 1;

        if let (Some(tx), ConnectorMessage::State { .. }) = (&echo, &message) {
            if tx.send(message).await.is_err() {
                warn!("Checkpoint echo stopped, destination acknowledgements are incomplete");
                break;
            }
        }
    }

    debug!(%origin, lines = line_no, accepted, "Feeder finished");
    Ok(accepted)
}

async fn echo_checkpoints(
    mut rx: mpsc::Receiver<ConnectorMessage>,
    messages: Arc<MessageTracker>,
) -> Result<u64, CliError> {
    let mut acknowledged = 0u64;
    while let Some(message) = rx.recv().await {
        messages.accept_from_destination(&message);
        acknowledged += 1;
    }
    Ok(acknowledged)
}

fn parse_line(origin: MessageOrigin, line_no: u64, line: &str) -> Option<ConnectorMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(%origin, line = line_no, error = %e, "Skipping malformed connector message");
            None
        }
    }
}
