use super::models::StreamStatusEvent;
use super::store::StreamStatusStore;
use super::tracker::StreamStatusTracker;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

pub type StatusEventSender = mpsc::UnboundedSender<StreamStatusEvent>;

/// Spawns the task that owns all calls into the status tracker.
///
/// The channel is unbounded so that senders on the record path never wait.
/// The task exits once every sender has been dropped and the queue drained.
/// It runs inside the caller's span.
pub fn spawn_status_worker<S>(
    tracker: Arc<StreamStatusTracker<S>>,
) -> (StatusEventSender, JoinHandle<()>)
where
    S: StreamStatusStore + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<StreamStatusEvent>();

    let handle = tokio::spawn(async move {
        let mut handled = 0u64;
        let mut rejected = 0u64;

        while let Some(event) = rx.recv().await {
            handled += 1;
            if let Err(e) = tracker.track(&event).await {
                rejected += 1;
                warn!(
                    stream = %event.stream,
                    origin = %event.origin,
                    status = %event.status,
                    error = %e,
                    "Dropping stream status event"
                );
            }
        }

        debug!(handled, rejected, "Status worker stopped");
    }
    .in_current_span());

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrackerMetrics;
    use crate::status::store::InMemoryStatusStore;
    use crate::status::models::StreamRunState;
    use chrono::Utc;
    use model::core::context::{MessageOrigin, ReplicationContext};
    use model::core::identifiers::StreamKey;
    use model::protocol::StreamStatusKind;
    use tracing_test::traced_test;
    use uuid::Uuid;

    #[traced_test]
    #[tokio::test]
    async fn processes_events_in_order_and_logs_rejections() {
        let tracker = Arc::new(StreamStatusTracker::new(
            InMemoryStatusStore::new(),
            Arc::new(TrackerMetrics::new()),
        ));
        let (tx, handle) = spawn_status_worker(Arc::clone(&tracker));
        let ctx = ReplicationContext::new(Uuid::new_v4(), Uuid::new_v4(), 1, 0);
        let users = StreamKey::new("users", None);

        for status in [
            StreamStatusKind::Running,
            StreamStatusKind::Started,
            StreamStatusKind::Running,
        ] {
            tx.send(StreamStatusEvent::new(
                ctx,
                MessageOrigin::Source,
                users.clone(),
                status,
                Utc::now(),
            ))
            .unwrap();
        }
        tx.send(StreamStatusEvent::sync_level(ctx, StreamStatusKind::Complete, Utc::now()))
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(tracker.live_count(), 0);
        let stored = &tracker.store().find("users")[0];
        assert_eq!(stored.history.len(), 2);
        assert_eq!(stored.run_state(), StreamRunState::Complete);
        assert!(logs_contain("Dropping stream status event"));
    }
}
