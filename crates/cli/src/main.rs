use crate::{
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use bookkeeping::config::BookkeepingConfig;
use clap::Parser;
use commands::Commands;
use model::core::context::ReplicationContext;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod commands;
mod error;
mod output;
mod replay;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "syncbook",
    version = "0.0.1",
    about = "Replication attempt bookkeeping"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(CliError::ShutdownRequested) => ExitCode::ShutdownRequested,
        Err(e) => {
            error!(error = %e, "syncbook failed");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

fn init_logging(log_messages: bool) {
    let default = if log_messages {
        "info,bookkeeping=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Commands::Replay {
            source,
            destination,
            strategy,
            log_messages,
            completed,
            job_id,
            attempt,
            json,
            output,
        } => {
            init_logging(log_messages);

            let mut config = BookkeepingConfig::from_env()?;
            if let Some(strategy) = strategy {
                config = config.with_strategy(strategy);
            }
            if log_messages {
                config = config.with_log_connector_messages(true);
            }

            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();

            let context = ReplicationContext::new(Uuid::new_v4(), Uuid::new_v4(), job_id, attempt);
            info!(source = %source.display(), %context, "Replaying connector output");

            let report = replay::replay_files(
                &source,
                destination.as_deref(),
                context,
                &config,
                completed,
                shutdown.cancel_token(),
            )
            .await?;

            match (output, json) {
                (Some(path), _) => output::write_report(&report, &path).await?,
                (None, true) => output::print_report_json(&report)?,
                (None, false) => output::print_report_table(&report),
            }

            if shutdown.is_shutdown_requested() {
                return Err(CliError::ShutdownRequested);
            }
            Ok(if report.succeeded() {
                ExitCode::Success
            } else {
                ExitCode::AttemptFailed
            })
        }
    }
}
