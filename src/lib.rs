//! Runkeeper: run coordination for a daily extraction job
//!
//! This crate keeps a recurring, externally-triggered extraction job and a
//! long-lived HTTP service in agreement about what is running, what last
//! succeeded, and whether a new run may start.

pub mod config;
pub mod gate;
pub mod notify;
pub mod runner;
pub mod schedule;
pub mod server;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Runkeeper operations
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Notification error: {0}")]
    Notify(#[from] notify::NotifyError),

    #[error("Store unavailable after {failures} consecutive failures")]
    StoreBudgetExhausted { failures: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid fire time '{0}', expected HH:MM")]
    InvalidFireTime(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}

/// Result type alias for Runkeeper operations
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use gate::{Admission, RejectReason, ScheduleGate};
pub use runner::{Dispatcher, ExtractionRunner};
pub use state::{RunStatus, TriggerSource};
pub use storage::{RunId, RunRecord, RunStore, SqliteRunStore, StoreHandle};
