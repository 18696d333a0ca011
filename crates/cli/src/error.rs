use bookkeeping::error::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read connector output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bookkeeping configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Replay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
