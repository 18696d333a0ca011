use bookkeeping::config::StatsStrategy;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Replay recorded connector output through the bookkeeping trackers
    Replay {
        #[arg(long, help = "JSON lines file with the messages the source emitted")]
        source: PathBuf,

        #[arg(
            long,
            help = "JSON lines file with the messages the destination emitted; when omitted every source checkpoint is acknowledged"
        )]
        destination: Option<PathBuf>,

        #[arg(long, help = "Stats tracking strategy: parallel or sequential")]
        strategy: Option<StatsStrategy>,

        #[arg(long, help = "Log every connector message at debug level")]
        log_messages: bool,

        #[arg(
            long,
            help = "Report committed counts as if the replication completed successfully"
        )]
        completed: bool,

        #[arg(long, default_value_t = 1, help = "Job id to attribute the replay to")]
        job_id: i64,

        #[arg(long, default_value_t = 0, help = "Attempt number within the job")]
        attempt: i32,

        #[arg(
            long,
            help = "If set, prints the report as JSON instead of a table"
        )]
        json: bool,

        #[arg(
            long,
            help = "If specified, writes the JSON report to this file instead of stdout"
        )]
        output: Option<PathBuf>,
    },
}
