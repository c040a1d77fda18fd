//! Storage module for persisting run records
//!
//! This module is the single source of truth for run coordination:
//! - SQLite database initialization and schema management
//! - Atomic admission (insert-if-idle) and status transitions
//! - Startup recovery of runs orphaned by a dead process
//! - History queries and pruning

mod handle;
mod retry;
mod schema;
mod sqlite;
mod traits;

pub use handle::StoreHandle;
pub use retry::RetryPolicy;
pub use sqlite::SqliteRunStore;
pub use traits::{RunStore, StorageError, StorageResult};

use crate::state::{RunStatus, TriggerSource};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Opens (or creates) the run store at the given path
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `retry` - Retry policy for busy/locked database operations
/// * `config_hash` - Hash recorded on every run this store creates
pub fn open_storage(
    path: &Path,
    retry: RetryPolicy,
    config_hash: &str,
) -> StorageResult<SqliteRunStore> {
    Ok(SqliteRunStore::open(path, retry)?.with_config_hash(config_hash))
}

/// Opaque, unique identifier of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generates a new time-ordered identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One attempt to execute the extraction work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: RunId,
    #[serde(skip)]
    pub seq: i64,
    pub status: RunStatus,
    pub trigger_source: TriggerSource,
    pub config_hash: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl RunRecord {
    /// Time the run has spent in the running state as of `now`
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match (self.status, self.started_at) {
            (RunStatus::Running, Some(started)) => Some(now - started),
            _ => None,
        }
    }

    /// Time since admission of a run that has not started, as of `now`
    pub fn pending_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match self.status {
            RunStatus::Pending => Some(now - self.created_at),
            _ => None,
        }
    }
}

/// A requested status change, carrying the fields that status requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `pending -> running`
    Start,
    /// `running -> succeeded`
    Succeed { result_ref: String },
    /// `running -> failed`
    Fail { error_detail: String },
    /// `running -> timed_out`
    TimeOut { error_detail: String },
    /// `pending -> abandoned`
    Abandon,
}

impl Transition {
    /// The status this transition moves a run into
    pub fn target(&self) -> RunStatus {
        match self {
            Self::Start => RunStatus::Running,
            Self::Succeed { .. } => RunStatus::Succeeded,
            Self::Fail { .. } => RunStatus::Failed,
            Self::TimeOut { .. } => RunStatus::TimedOut,
            Self::Abandon => RunStatus::Abandoned,
        }
    }
}

/// Result of an atomic insert-if-idle attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitOutcome {
    /// A new pending run was inserted
    Created(RunRecord),

    /// A pending or running run already holds the slot
    Active(RunRecord),

    /// A run finished inside the quiet window
    RecentlyFinished(RunRecord),
}

/// Formats a timestamp so that string order equals time order
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}
