//! Behaviour both stats strategies must share.

use crate::config::{BookkeepingConfig, StatsStrategy};
use crate::metrics::TrackerMetrics;
use crate::stats::{SyncStatsTracker, build_stats_tracker};
use model::core::identifiers::{StreamDescriptor, StreamKey};
use model::protocol::{EstimateTrace, RecordMessage, StateMessage};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;
use std::sync::Arc;

const STRATEGIES: [StatsStrategy; 2] = [StatsStrategy::Parallel, StatsStrategy::Sequential];

fn build(strategy: StatsStrategy) -> Arc<dyn SyncStatsTracker> {
    let config = BookkeepingConfig::default().with_strategy(strategy);
    build_stats_tracker(&config, Arc::new(TrackerMetrics::new()))
}

fn record(stream: &str, size: usize) -> RecordMessage {
    RecordMessage::new(stream, None, json!("x".repeat(size)))
}

fn checkpoint(stream: &str, cursor: u64) -> StateMessage {
    StateMessage::for_stream(StreamDescriptor::new(stream, None), json!({ "cursor": cursor }))
}

#[test]
fn committed_never_exceeds_emitted() {
    for strategy in STRATEGIES {
        let tracker = build(strategy);
        let mut rng = StdRng::seed_from_u64(7);
        let streams = ["users", "orders", "payments"];
        let mut cursor = 0u64;
        let mut staged: Vec<StateMessage> = Vec::new();

        for _ in 0..2_000 {
            let stream = streams[rng.gen_range(0..streams.len())];
            match rng.gen_range(0..10) {
                0..=5 => tracker.update_stats(&record(stream, rng.gen_range(1..64))),
                6 | 7 => {
                    cursor += 1;
                    let state = checkpoint(stream, cursor);
                    tracker.update_source_states_stats(&state);
                    staged.push(state);
                }
                _ => {
                    if !staged.is_empty() {
                        let state = staged.remove(rng.gen_range(0..staged.len()));
                        tracker.update_destination_state_stats(&state);
                    }
                }
            }

            let emitted = tracker.stream_to_emitted_records();
            for (key, committed) in tracker.stream_to_committed_records() {
                assert!(
                    committed <= emitted.get(&key).copied().unwrap_or(0),
                    "{strategy}: {key} committed {committed} above emitted"
                );
            }
        }
    }
}

#[test]
fn acknowledging_everything_commits_everything() {
    for strategy in STRATEGIES {
        let tracker = build(strategy);
        for (cursor, stream) in ["users", "orders", "users"].into_iter().enumerate() {
            tracker.update_stats(&record(stream, 10));
            tracker.update_stats(&record(stream, 20));
            tracker.update_source_states_stats(&checkpoint(stream, cursor as u64));
        }
        for (cursor, stream) in ["users", "orders", "users"].into_iter().enumerate() {
            tracker.update_destination_state_stats(&checkpoint(stream, cursor as u64));
        }

        assert_eq!(tracker.total_records_committed(), Some(6), "{strategy}");
        assert_eq!(
            tracker.total_bytes_committed(),
            Some(tracker.total_bytes_emitted()),
            "{strategy}"
        );
        assert_eq!(
            tracker.stream_to_committed_records().get(&StreamKey::new("users", None)),
            Some(&4),
            "{strategy}"
        );
    }
}

#[test]
fn mixed_estimates_are_never_reported() {
    for strategy in STRATEGIES {
        let tracker = build(strategy);
        let _ = tracker.update_estimates(&EstimateTrace::for_stream("users", None, 1, 10));
        let _ = tracker.update_estimates(&EstimateTrace::for_sync(5, 50));

        assert_eq!(tracker.total_records_estimated(), None, "{strategy}");
        assert_eq!(tracker.total_stats(false).estimated_bytes, None, "{strategy}");
        assert!(tracker.stream_to_estimated_records().is_empty(), "{strategy}");
    }
}

#[test]
fn completed_reports_are_serializable() {
    for strategy in STRATEGIES {
        let tracker = build(strategy);
        tracker.update_stats(&record("users", 3));
        tracker.update_source_states_stats(&checkpoint("users", 1));

        let report = serde_json::to_value(tracker.total_stats(true)).unwrap();
        assert_eq!(report["records_committed"], json!(1), "{strategy}");
        assert_eq!(report["estimated_records"], json!(null), "{strategy}");

        let streams = serde_json::to_value(tracker.per_stream_stats(true)).unwrap();
        assert_eq!(streams[0]["stream_name"], json!("users"), "{strategy}");
    }
}
