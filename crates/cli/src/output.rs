use crate::{error::CliError, replay::ReplayReport};
use std::path::Path;

fn generate_report_json(report: &ReplayReport) -> Result<String, CliError> {
    let json = serde_json::to_string_pretty(report)?;
    Ok(json)
}

pub async fn write_report(report: &ReplayReport, path: &Path) -> Result<(), CliError> {
    let report_json = generate_report_json(report)?;
    tokio::fs::write(path, report_json).await?;
    Ok(())
}

pub fn print_report_json(report: &ReplayReport) -> Result<(), CliError> {
    let report_json = generate_report_json(report)?;
    println!("{report_json}");
    Ok(())
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn print_report_table(report: &ReplayReport) {
    let totals = &report.totals;

    println!("Replay of {}:", report.context);
    println!("-----------------------------");
    println!("{:<28} {}", "Final status", report.final_status);
    println!("{:<28} {}", "Source messages", report.source_messages);
    println!("{:<28} {}", "Destination messages", report.destination_messages);
    println!("{:<28} {}", "Records emitted", totals.records_emitted);
    println!("{:<28} {}", "Bytes emitted", totals.bytes_emitted);
    println!("{:<28} {}", "Records committed", opt(totals.records_committed));
    println!("{:<28} {}", "Bytes committed", opt(totals.bytes_committed));
    println!("{:<28} {}", "Records rejected", totals.records_rejected);
    println!("{:<28} {}", "Records estimated", opt(totals.estimated_records));
    println!("{:<28} {}", "Source states", totals.source_state_messages_emitted);
    println!(
        "{:<28} {}",
        "Destination states", totals.destination_state_messages_emitted
    );
    println!(
        "{:<28} {}",
        "Max secs to source state",
        opt(totals.max_seconds_before_source_state_message_emitted)
    );
    println!(
        "{:<28} {}",
        "Max secs state to commit",
        opt(totals.max_seconds_between_state_message_emitted_and_committed)
    );

    if !report.streams.is_empty() {
        println!();
        println!(
            "{:<32} {:>12} {:>12} {:>12}",
            "Stream", "Emitted", "Committed", "Estimated"
        );
        for stream in &report.streams {
            let name = match &stream.stream_namespace {
                Some(ns) => format!("{ns}.{}", stream.stream_name),
                None => stream.stream_name.clone(),
            };
            println!(
                "{:<32} {:>12} {:>12} {:>12}",
                name,
                stream.stats.records_emitted,
                opt(stream.stats.records_committed),
                opt(stream.stats.estimated_records)
            );
        }
    }

    if !report.statuses.is_empty() {
        println!();
        println!("{:<32} {:<12} {:>11}", "Stream status", "State", "Transitions");
        for status in &report.statuses {
            println!(
                "{:<32} {:<12} {:>11}",
                status.stream_name, status.run_state, status.transitions
            );
        }
    }

    let metrics = &report.metrics;
    println!();
    println!("{:<28} {}", "State collisions", metrics.state_collisions_from_source);
    println!("{:<28} {}", "Unknown acknowledgements", metrics.unknown_states_from_destination);
    println!("{:<28} {}", "Checksum mismatches", metrics.checksum_mismatches);
    println!("{:<28} {}", "Status update failures", metrics.status_update_failures);

    if let Some(reason) = &report.failure_reason {
        println!();
        println!("Failure ({}): {}", reason.origin, reason.message);
        if let Some(internal) = &reason.internal_message {
            println!("  {internal}");
        }
    }
}
