//! Storage traits and error types
//!
//! This module defines the trait interface for run store backends and
//! associated error types.

use crate::state::{RunStatus, TriggerSource};
use crate::storage::{AdmitOutcome, RunId, RunRecord, Transition};
use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run store unavailable: {0}")]
    Unavailable(rusqlite::Error),

    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("Invalid transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Corrupt run record: {0}")]
    Corrupt(String),

    #[error("Run store lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Returns true for errors worth retrying at the storage layer
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Returns true if the store itself could not be read or written
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Poisoned)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => Self::Unavailable(err),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for run store backend implementations
///
/// Every mutating operation is atomic: it either fully applies and is
/// durable when the call returns, or it leaves the store unchanged.
pub trait RunStore: Send {
    // ===== Admission =====

    /// Inserts a new `pending` run unconditionally
    fn create(&mut self, trigger: TriggerSource, at: DateTime<Utc>) -> StorageResult<RunId>;

    /// Inserts a new `pending` run only if no run is pending or running
    ///
    /// When `quiet_since` is given, the insert is also refused if a
    /// completed run (succeeded, failed or timed out) finished after it.
    /// The check and the insert happen in one transaction.
    fn create_if_idle(
        &mut self,
        trigger: TriggerSource,
        at: DateTime<Utc>,
        quiet_since: Option<DateTime<Utc>>,
    ) -> StorageResult<AdmitOutcome>;

    // ===== Transitions =====

    /// Applies a status transition and returns the updated record
    ///
    /// Fails with `NotFound` for unknown runs and `InvalidTransition`
    /// when the state machine does not allow the change.
    fn transition(
        &mut self,
        run_id: &RunId,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> StorageResult<RunRecord>;

    /// Moves every pending or running run to `abandoned`
    ///
    /// Used once at process start, before any run can be admitted. This is
    /// the only way a `running` run becomes `abandoned`.
    fn recover_unfinished(&mut self, at: DateTime<Utc>) -> StorageResult<Vec<RunRecord>>;

    // ===== Queries =====

    /// Gets a run by ID
    fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Most recently started run that succeeded
    fn latest_succeeded(&self) -> StorageResult<Option<RunRecord>>;

    /// Most recently finished run of any terminal status
    fn latest_terminal(&self) -> StorageResult<Option<RunRecord>>;

    /// The run currently in the `running` state, if any
    fn current_running(&self) -> StorageResult<Option<RunRecord>>;

    /// The oldest run admitted but not yet started, if any
    fn oldest_pending(&self) -> StorageResult<Option<RunRecord>>;

    /// Newest runs first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    // ===== Maintenance =====

    /// Deletes the oldest terminal runs beyond `keep`
    ///
    /// Never deletes an active run or the latest succeeded run.
    /// Returns the number of deleted runs.
    fn prune_history(&mut self, keep: usize) -> StorageResult<usize>;

    /// Cheap reachability probe
    fn ping(&self) -> StorageResult<()>;
}
