use super::models::{
    CurrentStreamStatus, IncompleteRunCause, JobType, StreamRunState, StreamStatusCreate,
    StreamStatusEvent, StreamStatusKey, StreamStatusUpdate,
};
use super::store::StreamStatusStore;
use crate::error::{StatusStoreError, StreamStatusError};
use crate::metrics::{MetricClient, TrackerMetric};
use dashmap::{DashMap, mapref::entry::Entry};
use model::core::context::{MessageOrigin, ReplicationContext};
use model::core::identifiers::StreamKey;
use model::protocol::StreamStatusKind;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Derives one externally visible status per stream from the statuses the
/// source and destination report independently.
///
/// Records are created on STARTED and evicted once both sides are terminal,
/// or when an internal sync-level event sweeps the attempt. Rejected events
/// come back as [`StreamStatusError`] for the caller to log and drop.
pub struct StreamStatusTracker<S> {
    statuses: DashMap<StreamStatusKey, CurrentStreamStatus>,
    store: S,
    metrics: Arc<dyn MetricClient>,
}

impl<S: StreamStatusStore> StreamStatusTracker<S> {
    pub fn new(store: S, metrics: Arc<dyn MetricClient>) -> Self {
        Self {
            statuses: DashMap::new(),
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn current_stream_status(&self, key: &StreamStatusKey) -> Option<CurrentStreamStatus> {
        self.statuses.get(key).map(|entry| entry.value().clone())
    }

    pub fn live_count(&self) -> usize {
        self.statuses.len()
    }

    pub async fn track(&self, event: &StreamStatusEvent) -> Result<(), StreamStatusError> {
        debug!(
            stream = %event.stream,
            status = %event.status,
            origin = %event.origin,
            "Tracking stream status event"
        );

        match (event.origin, event.status) {
            (MessageOrigin::Internal, StreamStatusKind::Complete) => {
                self.force_all(event, StreamRunState::Complete).await;
                Ok(())
            }
            (MessageOrigin::Internal, StreamStatusKind::Incomplete) => {
                self.force_all(event, StreamRunState::Incomplete).await;
                Ok(())
            }
            (MessageOrigin::Internal, _) => Err(invalid(event)),
            (_, StreamStatusKind::Started) => self.handle_started(event).await,
            (_, StreamStatusKind::Running) => self.handle_running(event).await,
            (_, StreamStatusKind::Complete) => self.handle_complete(event).await,
            (_, StreamStatusKind::Incomplete) => self.handle_incomplete(event).await,
        }
    }

    async fn handle_started(&self, event: &StreamStatusEvent) -> Result<(), StreamStatusError> {
        let key = event.key();
        // The placeholder guards against a second create while this one is in flight.
        match self.statuses.entry(key.clone()) {
            Entry::Occupied(_) => return Err(invalid(event)),
            Entry::Vacant(vacant) => {
                vacant.insert(CurrentStreamStatus::started(event.origin));
            }
        }

        let request = StreamStatusCreate {
            workspace_id: event.context.workspace_id,
            connection_id: event.context.connection_id,
            job_id: event.context.job_id,
            attempt: event.context.attempt,
            stream_name: event.stream.name().to_string(),
            stream_namespace: event.stream.namespace().map(str::to_string),
            job_type: JobType::from(&event.context),
            run_state: StreamRunState::Pending,
            transitioned_at: event.transitioned_at,
        };

        let id = match self.store.create_status(request).await {
            Ok(id) => id,
            Err(source) => {
                self.statuses
                    .remove_if(&key, |_, current| current.status_id.is_none());
                return Err(self.store_failure(&event.stream, source));
            }
        };

        if let Some(mut current) = self.statuses.get_mut(&key) {
            current.status_id = Some(id);
        }
        info!(stream = %event.stream, status_id = %id, "Stream status created as PENDING");
        Ok(())
    }

    async fn handle_running(&self, event: &StreamStatusEvent) -> Result<(), StreamStatusError> {
        let key = event.key();
        let status_id = {
            let current = self.statuses.get(&key).ok_or_else(|| invalid(event))?;
            if current.current() != Some(StreamStatusKind::Started) {
                return Err(invalid(event));
            }
            current.status_id
        };

        self.send_update(&key, status_id, StreamRunState::Running, None, event)
            .await?;
        self.set_side(&key, MessageOrigin::Source, StreamStatusKind::Running);
        Ok(())
    }

    async fn handle_complete(&self, event: &StreamStatusEvent) -> Result<(), StreamStatusError> {
        let key = event.key();
        let (status_id, next) = {
            let current = self.statuses.get(&key).ok_or_else(|| invalid(event))?;
            let mut next = current.clone();
            next.set(event.origin, StreamStatusKind::Complete);
            (current.status_id, next)
        };

        if next.is_complete() {
            self.send_update(&key, status_id, StreamRunState::Complete, None, event)
                .await?;
        }
        self.set_side(&key, event.origin, StreamStatusKind::Complete);
        if next.is_terminal() {
            self.evict(&key);
        }
        Ok(())
    }

    async fn handle_incomplete(&self, event: &StreamStatusEvent) -> Result<(), StreamStatusError> {
        let key = event.key();
        let (status_id, already_incomplete, next) = {
            let current = self.statuses.get(&key).ok_or_else(|| invalid(event))?;
            let mut next = current.clone();
            next.set(event.origin, StreamStatusKind::Incomplete);
            (
                current.status_id,
                current.run_state == StreamRunState::Incomplete,
                next,
            )
        };

        if !already_incomplete {
            self.send_update(
                &key,
                status_id,
                StreamRunState::Incomplete,
                Some(IncompleteRunCause::Failed),
                event,
            )
            .await?;
        }
        self.set_side(&key, event.origin, StreamStatusKind::Incomplete);
        if next.is_terminal() {
            self.evict(&key);
        }
        Ok(())
    }

    /// Side statuses are only recorded once the store has accepted the change.
    fn set_side(&self, key: &StreamStatusKey, origin: MessageOrigin, status: StreamStatusKind) {
        if let Some(mut current) = self.statuses.get_mut(key) {
            current.set(origin, status);
        }
    }

    /// Moves every live record of the event's attempt to `target` and evicts it.
    async fn force_all(&self, event: &StreamStatusEvent, target: StreamRunState) {
        let side_status = match target {
            StreamRunState::Incomplete => StreamStatusKind::Incomplete,
            _ => StreamStatusKind::Complete,
        };
        let cause = (target == StreamRunState::Incomplete).then_some(IncompleteRunCause::Failed);

        let live: Vec<_> = self
            .statuses
            .iter()
            .filter(|entry| entry.key().belongs_to(&event.context))
            .map(|entry| (entry.key().clone(), entry.value().status_id, entry.value().run_state))
            .collect();

        for (key, status_id, run_state) in &live {
            if let Some(mut current) = self.statuses.get_mut(key) {
                current.set(MessageOrigin::Internal, side_status);
            }
            if !run_state.is_terminal() {
                if let Err(err) = self.send_update(key, *status_id, target, cause, event).await {
                    warn!(stream = %key.stream, error = %err, "Forced status update failed");
                }
            }
            self.evict(key);
        }

        info!(
            context = %event.context,
            streams = live.len(),
            run_state = %target,
            "Forced remaining streams to a final status"
        );
    }

    async fn send_update(
        &self,
        key: &StreamStatusKey,
        status_id: Option<Uuid>,
        run_state: StreamRunState,
        incomplete_cause: Option<IncompleteRunCause>,
        event: &StreamStatusEvent,
    ) -> Result<(), StreamStatusError> {
        let id = status_id.ok_or_else(|| StreamStatusError::MissingStatusId {
            stream: key.stream.clone(),
        })?;

        let request = StreamStatusUpdate {
            id,
            job_type: JobType::from(&event.context),
            run_state,
            incomplete_cause,
            transitioned_at: event.transitioned_at,
        };
        self.store
            .update_status(request)
            .await
            .map_err(|source| self.store_failure(&key.stream, source))?;

        if let Some(mut current) = self.statuses.get_mut(key) {
            current.run_state = run_state;
        }
        info!(stream = %key.stream, run_state = %run_state, "Stream status updated");
        Ok(())
    }

    fn store_failure(
        &self,
        stream: &StreamKey,
        source: StatusStoreError,
    ) -> StreamStatusError {
        error!(stream = %stream, error = %source, "Status store call failed");
        self.metrics.count(TrackerMetric::StatusUpdateFailure, 1);
        StreamStatusError::Store {
            stream: stream.clone(),
            source,
        }
    }

    fn evict(&self, key: &StreamStatusKey) {
        if self.statuses.remove(key).is_some() {
            debug!(stream = %key.stream, "Evicted stream status");
        }
    }

    /// Live keys for `context`, mostly useful for progress queries.
    pub fn live_keys(&self, context: &ReplicationContext) -> Vec<StreamStatusKey> {
        self.statuses
            .iter()
            .filter(|entry| entry.key().belongs_to(context))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

fn invalid(event: &StreamStatusEvent) -> StreamStatusError {
    StreamStatusError::InvalidTransition {
        status: event.status,
        origin: event.origin,
        stream: event.stream.clone(),
    }
}
