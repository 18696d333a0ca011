pub mod config;
pub mod error;
pub mod message_tracker;
pub mod metrics;
pub mod retry;
pub mod state;
pub mod stats;
pub mod status;

#[cfg(test)]
mod tests;
