use crate::{error::ConfigError, retry::RetryPolicy};
use std::{fmt, str::FromStr};

pub const DEFAULT_DELTA_TRACKER_MEMORY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_STATE_METRICS_MESSAGE_LIMIT: usize = 873_813;

const ENV_STATS_STRATEGY: &str = "BOOKKEEPING_STATS_STRATEGY";
const ENV_LOG_CONNECTOR_MESSAGES: &str = "BOOKKEEPING_LOG_CONNECTOR_MESSAGES";
const ENV_DELTA_TRACKER_MEMORY_LIMIT: &str = "BOOKKEEPING_DELTA_TRACKER_MEMORY_LIMIT_BYTES";
const ENV_STATE_METRICS_MESSAGE_LIMIT: &str = "BOOKKEEPING_STATE_METRICS_MESSAGE_LIMIT";
const ENV_STATUS_RETRY_ATTEMPTS: &str = "BOOKKEEPING_STATUS_RETRY_ATTEMPTS";

/// Which sync stats tracker implementation to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatsStrategy {
    /// One independent tracker per stream, safe under concurrent feeders.
    #[default]
    Parallel,
    /// Single-writer tracker with a shared, memory-bounded delta structure.
    Sequential,
}

impl FromStr for StatsStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" | "concurrent" => Ok(StatsStrategy::Parallel),
            "sequential" | "legacy" => Ok(StatsStrategy::Sequential),
            _ => Err(invalid("stats strategy", s)),
        }
    }
}

impl fmt::Display for StatsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsStrategy::Parallel => f.write_str("parallel"),
            StatsStrategy::Sequential => f.write_str("sequential"),
        }
    }
}

/// Configuration for the trackers of one sync attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BookkeepingConfig {
    pub strategy: StatsStrategy,

    /// Log every connector message at debug level
    pub log_connector_messages: bool,

    /// Budget for the sequential strategy's state delta tracker
    pub delta_tracker_memory_limit_bytes: usize,

    /// Message budget for the sequential strategy's timing tracker
    pub state_metrics_message_limit: usize,

    /// Retry policy for status store calls
    pub status_retry: RetryPolicy,
}

impl Default for BookkeepingConfig {
    fn default() -> Self {
        Self {
            strategy: StatsStrategy::Parallel,
            log_connector_messages: false,
            delta_tracker_memory_limit_bytes: DEFAULT_DELTA_TRACKER_MEMORY_LIMIT_BYTES,
            state_metrics_message_limit: DEFAULT_STATE_METRICS_MESSAGE_LIMIT,
            status_retry: RetryPolicy::for_status_store(),
        }
    }
}

impl BookkeepingConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_STATS_STRATEGY) {
            config.strategy = raw.parse().map_err(|_| invalid(ENV_STATS_STRATEGY, &raw))?;
        }
        if let Some(raw) = lookup(ENV_LOG_CONNECTOR_MESSAGES) {
            config.log_connector_messages = parse_bool(ENV_LOG_CONNECTOR_MESSAGES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DELTA_TRACKER_MEMORY_LIMIT) {
            config.delta_tracker_memory_limit_bytes =
                parse_usize(ENV_DELTA_TRACKER_MEMORY_LIMIT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STATE_METRICS_MESSAGE_LIMIT) {
            config.state_metrics_message_limit =
                parse_usize(ENV_STATE_METRICS_MESSAGE_LIMIT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STATUS_RETRY_ATTEMPTS) {
            let attempts = parse_usize(ENV_STATUS_RETRY_ATTEMPTS, &raw)?;
            if attempts == 0 {
                return Err(invalid(ENV_STATUS_RETRY_ATTEMPTS, &raw));
            }
            config.status_retry = config.status_retry.with_max_attempts(attempts);
        }

        Ok(config)
    }

    pub fn with_strategy(mut self, strategy: StatsStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_log_connector_messages(mut self, enabled: bool) -> Self {
        self.log_connector_messages = enabled;
        self
    }

    pub fn with_delta_tracker_memory_limit(mut self, bytes: usize) -> Self {
        self.delta_tracker_memory_limit_bytes = bytes;
        self
    }

    pub fn with_state_metrics_message_limit(mut self, limit: usize) -> Self {
        self.state_metrics_message_limit = limit;
        self
    }

    pub fn with_status_retry(mut self, policy: RetryPolicy) -> Self {
        self.status_retry = policy;
        self
    }
}

fn invalid(key: &'static str, raw: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, raw)),
    }
}

fn parse_usize(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}
