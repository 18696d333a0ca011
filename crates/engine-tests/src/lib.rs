#![allow(dead_code)]

use bookkeeping::{
    config::BookkeepingConfig,
    message_tracker::{FailureReason, MessageTracker},
    metrics::TrackerMetrics,
    retry::RetryPolicy,
    stats::{SyncStatsTracker, build_stats_tracker},
    status::{
        InMemoryStatusStore, RetryingStatusStore, StatusEventSender, StreamStatusEvent,
        StreamStatusTracker, spawn_status_worker,
    },
};
use chrono::Utc;
use model::core::context::ReplicationContext;
use model::protocol::StreamStatusKind;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub mod integration;
pub mod utils;

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub type TestStatusTracker = StreamStatusTracker<RetryingStatusStore<InMemoryStatusStore>>;

/// Everything one attempt needs, wired the way the worker wires it.
pub struct Harness {
    pub context: ReplicationContext,
    pub messages: Arc<MessageTracker>,
    pub statuses: Arc<TestStatusTracker>,
    pub metrics: TrackerMetrics,
    events: StatusEventSender,
    worker: JoinHandle<()>,
}

/// What is left once the attempt has been closed out.
pub struct Finished {
    pub stats: Arc<dyn SyncStatsTracker>,
    pub failure_reason: Option<FailureReason>,
    pub statuses: Arc<TestStatusTracker>,
    pub metrics: TrackerMetrics,
    pub context: ReplicationContext,
}

impl Harness {
    pub fn new(config: BookkeepingConfig) -> Self {
        let context = ReplicationContext::new(Uuid::new_v4(), Uuid::new_v4(), 100, 0);
        let metrics = TrackerMetrics::new();

        let store = RetryingStatusStore::new(
            InMemoryStatusStore::new(),
            RetryPolicy::immediate(config.status_retry.max_attempts),
        );
        let statuses = Arc::new(StreamStatusTracker::new(store, Arc::new(metrics.clone())));
        let (events, worker) = spawn_status_worker(Arc::clone(&statuses));

        let stats = build_stats_tracker(&config, Arc::new(metrics.clone()));
        let messages = Arc::new(
            MessageTracker::new(context, stats, &config).with_status_events(events.clone()),
        );

        Self {
            context,
            messages,
            statuses,
            metrics,
            events,
            worker,
        }
    }

    pub fn store(&self) -> &InMemoryStatusStore {
        self.statuses.store().inner()
    }

    /// Sends the sync-level status and waits for the worker to drain.
    ///
    /// Every clone of `messages` handed to feeder tasks must be dropped first.
    pub async fn finish(self, status: StreamStatusKind) -> Finished {
        let Harness {
            context,
            messages,
            statuses,
            metrics,
            events,
            worker,
        } = self;

        events
            .send(StreamStatusEvent::sync_level(context, status, Utc::now()))
            .expect("status worker alive");
        drop(events);

        let stats = Arc::clone(messages.stats());
        let failure_reason = messages.error_trace_failure_reason();
        drop(messages);

        tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker)
            .await
            .expect("status worker did not stop")
            .expect("status worker panicked");

        Finished {
            stats,
            failure_reason,
            statuses,
            metrics,
            context,
        }
    }
}
