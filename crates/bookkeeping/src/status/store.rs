use super::models::{
    IncompleteRunCause, StreamRunState, StreamStatusCreate, StreamStatusUpdate,
};
use crate::error::StatusStoreError;
use crate::retry::{RetryDisposition, RetryError, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;
use uuid::Uuid;

/// Persistence collaborator for stream statuses. Both calls must be safe to retry.
#[async_trait]
pub trait StreamStatusStore: Send + Sync {
    async fn create_status(&self, request: StreamStatusCreate) -> Result<Uuid, StatusStoreError>;

    async fn update_status(&self, request: StreamStatusUpdate) -> Result<(), StatusStoreError>;
}

fn classify(err: &StatusStoreError) -> RetryDisposition {
    match err {
        StatusStoreError::Unavailable(_) => RetryDisposition::Retry,
        _ => RetryDisposition::Stop,
    }
}

fn flatten(err: RetryError<StatusStoreError>) -> StatusStoreError {
    match err {
        RetryError::Fatal(err) => err,
        RetryError::AttemptsExceeded(err) => StatusStoreError::RetriesExhausted(err.to_string()),
    }
}

/// Wraps a store so that unavailable errors are retried with jittered backoff.
pub struct RetryingStatusStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: StreamStatusStore> RetryingStatusStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StreamStatusStore> StreamStatusStore for RetryingStatusStore<S> {
    async fn create_status(&self, request: StreamStatusCreate) -> Result<Uuid, StatusStoreError> {
        self.policy
            .run(
                || {
                    let request = request.clone();
                    async move { self.inner.create_status(request).await }
                },
                classify,
            )
            .await
            .map_err(flatten)
    }

    async fn update_status(&self, request: StreamStatusUpdate) -> Result<(), StatusStoreError> {
        self.policy
            .run(
                || {
                    let request = request.clone();
                    async move { self.inner.update_status(request).await }
                },
                classify,
            )
            .await
            .map_err(flatten)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub run_state: StreamRunState,
    pub incomplete_cause: Option<IncompleteRunCause>,
    pub transitioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStreamStatus {
    pub id: Uuid,
    pub created: StreamStatusCreate,
    pub history: Vec<StatusTransition>,
}

impl StoredStreamStatus {
    pub fn run_state(&self) -> StreamRunState {
        self.history
            .last()
            .map(|t| t.run_state)
            .unwrap_or(self.created.run_state)
    }
}

/// Status store kept in process memory, with the full transition history of
/// every status. Can be told to fail a number of upcoming calls.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    statuses: DashMap<Uuid, StoredStreamStatus>,
    failures_remaining: AtomicUsize,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail as unavailable.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn get(&self, id: &Uuid) -> Option<StoredStreamStatus> {
        self.statuses.get(id).map(|entry| entry.value().clone())
    }

    pub fn find(&self, stream_name: &str) -> Vec<StoredStreamStatus> {
        self.statuses
            .iter()
            .filter(|entry| entry.created.stream_name == stream_name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<StoredStreamStatus> {
        let mut all: Vec<_> = self.statuses.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            (a.created.stream_namespace.as_deref(), a.created.stream_name.as_str())
                .cmp(&(b.created.stream_namespace.as_deref(), b.created.stream_name.as_str()))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    fn injected_failure(&self) -> Result<(), StatusStoreError> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            warn!("Injected status store failure");
            return Err(StatusStoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamStatusStore for InMemoryStatusStore {
    async fn create_status(&self, request: StreamStatusCreate) -> Result<Uuid, StatusStoreError> {
        self.injected_failure()?;
        let id = Uuid::new_v4();
        self.statuses.insert(
            id,
            StoredStreamStatus {
                id,
                created: request,
                history: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn update_status(&self, request: StreamStatusUpdate) -> Result<(), StatusStoreError> {
        self.injected_failure()?;
        let mut entry = self
            .statuses
            .get_mut(&request.id)
            .ok_or(StatusStoreError::UnknownStatus(request.id))?;
        entry.history.push(StatusTransition {
            run_state: request.run_state,
            incomplete_cause: request.incomplete_cause,
            transitioned_at: request.transitioned_at,
        });
        Ok(())
    }
}
