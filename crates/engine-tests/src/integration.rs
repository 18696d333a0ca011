#[cfg(test)]
mod tests {
    use crate::{
        Harness,
        utils::{
            counted_stream_state, error, global_state, record, status, stream_estimate,
            stream_state, sync_estimate,
        },
    };
    use bookkeeping::{
        config::{BookkeepingConfig, StatsStrategy},
        metrics::TrackerMetric,
        status::StreamRunState,
    };
    use model::core::{context::MessageOrigin, identifiers::StreamKey};
    use model::protocol::{ConnectorMessage, FailureType, StreamStatusKind};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracing::Instrument;
    use tracing_test::traced_test;

    const STREAMS: [&str; 4] = ["users", "orders", "payments", "refunds"];

    fn key(stream: &str) -> StreamKey {
        StreamKey::new(stream, Some("public"))
    }

    /// Source feeder emits records and checkpoints per stream; the destination
    /// feeder echoes every checkpoint it receives, concurrently.
    async fn replay_concurrently(harness: &Harness, records_per_checkpoint: u64, checkpoints: u64) {
        let (to_destination, mut from_source) = mpsc::channel::<ConnectorMessage>(64);

        let source = {
            let messages = Arc::clone(&harness.messages);
            tokio::spawn(async move {
                let mut id = 0;
                for cursor in 0..checkpoints {
                    for stream in STREAMS {
                        for _ in 0..records_per_checkpoint {
                            id += 1;
                            messages.accept_from_source(&record(stream, id));
                        }
                        let state = stream_state(stream, cursor);
                        messages.accept_from_source(&state);
                        to_destination.send(state).await.expect("destination alive");
                    }
                    tokio::task::yield_now().await;
                }
            }
            .in_current_span())
        };

        let destination = {
            let messages = Arc::clone(&harness.messages);
            tokio::spawn(async move {
                while let Some(state) = from_source.recv().await {
                    messages.accept_from_destination(&state);
                }
            }
            .in_current_span())
        };

        source.await.unwrap();
        destination.await.unwrap();
    }

    #[traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_feeders_commit_everything() {
        let harness = Harness::new(BookkeepingConfig::default());
        replay_concurrently(&harness, 25, 40).await;

        let finished = harness.finish(StreamStatusKind::Complete).await;
        let total = finished.stats.total_stats(false);

        assert_eq!(total.records_emitted, 25 * 40 * STREAMS.len() as u64);
        assert_eq!(total.records_committed, Some(total.records_emitted));
        assert_eq!(total.bytes_committed, Some(total.bytes_emitted));
        assert_eq!(total.source_state_messages_emitted, 40 * STREAMS.len() as u64);
        assert_eq!(total.destination_state_messages_emitted, 40 * STREAMS.len() as u64);
        assert_eq!(finished.metrics.snapshot().unknown_states_from_destination, 0);

        let per_stream = finished.stats.per_stream_stats(false);
        assert_eq!(per_stream.len(), STREAMS.len());
        for stream in per_stream {
            assert_eq!(stream.stream_namespace.as_deref(), Some("public"));
            assert_eq!(stream.stats.records_committed, Some(1000));
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn sequential_strategy_matches_for_single_writer() {
        let harness =
            Harness::new(BookkeepingConfig::default().with_strategy(StatsStrategy::Sequential));
        replay_concurrently(&harness, 5, 10).await;

        let finished = harness.finish(StreamStatusKind::Complete).await;
        let total = finished.stats.total_stats(false);
        assert_eq!(total.records_emitted, 5 * 10 * STREAMS.len() as u64);
        assert_eq!(total.records_committed, Some(total.records_emitted));
        assert!(!finished.stats.unreliable_committed_counts());
    }

    #[traced_test]
    #[tokio::test]
    async fn tiny_delta_budget_degrades_to_not_computable() {
        let config = BookkeepingConfig::default()
            .with_strategy(StatsStrategy::Sequential)
            .with_delta_tracker_memory_limit(16);
        let harness = Harness::new(config);
        replay_concurrently(&harness, 3, 2).await;

        let finished = harness.finish(StreamStatusKind::Complete).await;
        assert!(finished.stats.unreliable_committed_counts());
        assert_eq!(finished.stats.total_stats(false).records_committed, None);
        assert_eq!(finished.stats.total_stats(false).records_emitted, 3 * 2 * 4);
        assert_eq!(finished.stats.total_stats(true).records_committed, Some(24));
        assert!(logs_contain("Committed counts are no longer reliable"));
    }

    #[traced_test]
    #[tokio::test]
    async fn reused_checkpoint_only_affects_its_stream() {
        let harness = Harness::new(BookkeepingConfig::default());
        let messages = &harness.messages;

        messages.accept_from_source(&record("users", 1));
        messages.accept_from_source(&stream_state("users", 1));
        messages.accept_from_source(&record("users", 2));
        messages.accept_from_source(&stream_state("users", 1));
        messages.accept_from_source(&record("orders", 3));
        messages.accept_from_source(&stream_state("orders", 1));
        messages.accept_from_destination(&stream_state("users", 1));
        messages.accept_from_destination(&stream_state("orders", 1));

        let finished = harness.finish(StreamStatusKind::Complete).await;
        let committed = finished.stats.stream_to_committed_records();

        assert_eq!(committed.get(&key("orders")), Some(&1));
        assert!(!committed.contains_key(&key("users")));
        assert_eq!(finished.stats.total_records_committed(), Some(1));
        assert_eq!(finished.stats.stream_to_emitted_records().get(&key("users")), Some(&2));
        assert_eq!(finished.metrics.get(TrackerMetric::StateCollisionFromSource), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn destination_coalescing_credits_skipped_checkpoints() {
        let harness = Harness::new(BookkeepingConfig::default());
        let messages = &harness.messages;

        for cursor in 0..5 {
            messages.accept_from_source(&record("users", cursor));
            messages.accept_from_source(&record("users", cursor + 100));
            messages.accept_from_source(&counted_stream_state("users", cursor, 2));
        }
        messages.accept_from_destination(&stream_state("users", 3));

        let finished = harness.finish(StreamStatusKind::Complete).await;
        assert_eq!(finished.stats.total_records_committed(), Some(8));
        assert_eq!(finished.stats.total_records_emitted(), 10);
        assert_eq!(finished.metrics.get(TrackerMetric::ChecksumMismatch), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn global_checkpoints_commit_all_listed_streams() {
        let harness = Harness::new(BookkeepingConfig::default());
        let messages = &harness.messages;

        messages.accept_from_source(&record("users", 1));
        messages.accept_from_source(&record("orders", 2));
        messages.accept_from_source(&record("orders", 3));
        messages.accept_from_source(&global_state(&["users", "orders"], 10));
        messages.accept_from_destination(&global_state(&["users", "orders"], 10));

        let finished = harness.finish(StreamStatusKind::Complete).await;
        let committed = finished.stats.stream_to_committed_records();
        assert_eq!(committed.get(&key("users")), Some(&1));
        assert_eq!(committed.get(&key("orders")), Some(&2));
        assert_eq!(finished.stats.total_source_state_messages_emitted(), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn estimates_follow_the_first_granularity() {
        let harness = Harness::new(BookkeepingConfig::default());
        harness.messages.accept_from_source(&stream_estimate("users", 100, 1000));
        harness.messages.accept_from_source(&stream_estimate("orders", 50, 500));
        assert_eq!(harness.messages.stats().total_records_estimated(), Some(150));

        harness.messages.accept_from_source(&sync_estimate(10, 10));
        let finished = harness.finish(StreamStatusKind::Complete).await;

        assert_eq!(finished.stats.total_records_estimated(), None);
        assert!(finished.stats.stream_to_estimated_records().is_empty());
        assert!(logs_contain("estimates disabled"));
    }

    #[traced_test]
    #[tokio::test]
    async fn stream_statuses_follow_both_sides() {
        let harness = Harness::new(BookkeepingConfig::default());
        let messages = &harness.messages;

        for stream in ["users", "orders", "payments"] {
            messages.accept_from_source(&status(stream, StreamStatusKind::Started, 1.0));
            messages.accept_from_source(&status(stream, StreamStatusKind::Running, 2.0));
            messages.accept_from_source(&status(stream, StreamStatusKind::Complete, 3.0));
        }
        messages.accept_from_destination(&status("users", StreamStatusKind::Complete, 4.0));
        messages.accept_from_destination(&status("orders", StreamStatusKind::Incomplete, 4.0));
        // a second STARTED is rejected by the worker and dropped
        messages.accept_from_source(&status("payments", StreamStatusKind::Started, 5.0));

        let finished = harness.finish(StreamStatusKind::Complete).await;
        assert_eq!(finished.statuses.live_count(), 0);

        let store = finished.statuses.store().inner();
        assert_eq!(store.len(), 3);
        let state_of = |name: &str| store.find(name)[0].run_state();
        assert_eq!(state_of("users"), StreamRunState::Complete);
        assert_eq!(state_of("orders"), StreamRunState::Incomplete);
        // never completed by the destination, closed by the sweep
        assert_eq!(state_of("payments"), StreamRunState::Complete);
        assert!(logs_contain("Dropping stream status event"));
    }

    #[traced_test]
    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let harness = Harness::new(BookkeepingConfig::default());
        harness.store().fail_next(2);

        harness
            .messages
            .accept_from_source(&status("users", StreamStatusKind::Started, 1.0));
        let finished = harness.finish(StreamStatusKind::Complete).await;

        let stored = &finished.statuses.store().inner().find("users")[0];
        assert_eq!(stored.run_state(), StreamRunState::Complete);
        assert_eq!(finished.metrics.get(TrackerMetric::StatusUpdateFailure), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_attempt_reports_earliest_error() {
        let harness = Harness::new(BookkeepingConfig::default());
        harness
            .messages
            .accept_from_source(&status("users", StreamStatusKind::Started, 1.0));
        harness
            .messages
            .accept_from_source(&error("source timeout", FailureType::TransientError, 30.0));
        harness
            .messages
            .accept_from_destination(&error("disk full", FailureType::SystemError, 20.0));

        let finished = harness.finish(StreamStatusKind::Incomplete).await;

        let reason = finished.failure_reason.expect("failure reason");
        assert_eq!(reason.origin, MessageOrigin::Destination);
        assert_eq!(reason.failure_type, Some(FailureType::SystemError));
        assert_eq!(reason.message, "disk full");

        let stored = &finished.statuses.store().inner().find("users")[0];
        assert_eq!(stored.run_state(), StreamRunState::Incomplete);
    }
}
