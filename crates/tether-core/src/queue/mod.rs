//! Queue module: configuration, backoff policy and scheduling.

mod config;
mod retry;
mod scheduler;

pub use config::{ConfigError, QueueConfig};
pub use retry::BackoffPolicy;
pub use scheduler::Scheduler;
