//! SQLite run store implementation
//!
//! This module provides a SQLite-based implementation of the RunStore trait.

use crate::state::{RunStatus, TriggerSource};
use crate::storage::retry::{retry_transient, RetryPolicy};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RunStore, StorageError, StorageResult};
use crate::storage::{
    format_timestamp, parse_timestamp, AdmitOutcome, RunId, RunRecord, Transition,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const RUN_COLUMNS: &str = "seq, run_id, status, trigger_source, config_hash, created_at, \
                           started_at, finished_at, result_ref, error_detail";

/// Statuses that count against the minimum interval between runs
const COMPLETED_STATUSES: &str = "('succeeded', 'failed', 'timed_out')";

/// SQLite run store backend
pub struct SqliteRunStore {
    conn: Connection,
    retry: RetryPolicy,
    config_hash: String,
}

impl SqliteRunStore {
    /// Opens or creates a run store database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `retry` - Retry policy for busy/locked operations
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteRunStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path, retry: RetryPolicy) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Terminal transitions must survive a crash right after they return
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        conn.busy_timeout(Duration::from_millis(250))?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            retry,
            config_hash: String::new(),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            retry: RetryPolicy::none(),
            config_hash: String::new(),
        })
    }

    /// Sets the configuration hash stamped on every new run
    pub fn with_config_hash(mut self, config_hash: &str) -> Self {
        self.config_hash = config_hash.to_string();
        self
    }

    fn create_inner(&mut self, trigger: TriggerSource, at: DateTime<Utc>) -> StorageResult<RunId> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = insert_pending(&tx, trigger, &self.config_hash, at)?;
        tx.commit()?;
        Ok(record.run_id)
    }

    fn create_if_idle_inner(
        &mut self,
        trigger: TriggerSource,
        at: DateTime<Utc>,
        quiet_since: Option<DateTime<Utc>>,
    ) -> StorageResult<AdmitOutcome> {
        // IMMEDIATE takes the write lock up front, so no other writer can
        // slip an insert in between the checks and our own insert.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(active) = query_run(
            &tx,
            "WHERE status IN ('pending', 'running') ORDER BY seq DESC LIMIT 1",
            [],
        )? {
            return Ok(AdmitOutcome::Active(active));
        }

        if let Some(cutoff) = quiet_since {
            let clause = format!(
                "WHERE status IN {} AND finished_at > ?1 ORDER BY finished_at DESC LIMIT 1",
                COMPLETED_STATUSES
            );
            if let Some(recent) = query_run(&tx, &clause, params![format_timestamp(cutoff)])? {
                return Ok(AdmitOutcome::RecentlyFinished(recent));
            }
        }

        let record = insert_pending(&tx, trigger, &self.config_hash, at)?;
        tx.commit()?;
        Ok(AdmitOutcome::Created(record))
    }

    fn transition_inner(
        &mut self,
        run_id: &RunId,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> StorageResult<RunRecord> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let current = current.ok_or_else(|| StorageError::NotFound(run_id.clone()))?;
        let from = parse_status(&current)?;
        let to = transition.target();

        if !from.can_transition_to(to) {
            return Err(StorageError::InvalidTransition {
                run_id: run_id.clone(),
                from,
                to,
            });
        }

        let ts = format_timestamp(at);
        match transition {
            Transition::Start => tx.execute(
                "UPDATE runs SET status = ?1, started_at = ?2 WHERE run_id = ?3",
                params![to.to_db_string(), ts, run_id.as_str()],
            )?,
            Transition::Succeed { result_ref } => tx.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, result_ref = ?3 WHERE run_id = ?4",
                params![to.to_db_string(), ts, result_ref, run_id.as_str()],
            )?,
            Transition::Fail { error_detail } | Transition::TimeOut { error_detail } => tx
                .execute(
                    "UPDATE runs SET status = ?1, finished_at = ?2, error_detail = ?3 WHERE run_id = ?4",
                    params![to.to_db_string(), ts, error_detail, run_id.as_str()],
                )?,
            Transition::Abandon => tx.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2 WHERE run_id = ?3",
                params![to.to_db_string(), ts, run_id.as_str()],
            )?,
        };

        let record = query_run(&tx, "WHERE run_id = ?1", params![run_id.as_str()])?
            .ok_or_else(|| StorageError::NotFound(run_id.clone()))?;
        tx.commit()?;
        Ok(record)
    }

    fn recover_unfinished_inner(&mut self, at: DateTime<Utc>) -> StorageResult<Vec<RunRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let orphaned = query_runs(
            &tx,
            "WHERE status IN ('pending', 'running') ORDER BY seq ASC",
            [],
        )?;
        if orphaned.is_empty() {
            return Ok(Vec::new());
        }

        tx.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE status IN ('pending', 'running')",
            params![RunStatus::Abandoned.to_db_string(), format_timestamp(at)],
        )?;

        let mut recovered = Vec::with_capacity(orphaned.len());
        for run in orphaned {
            if let Some(updated) = query_run(&tx, "WHERE seq = ?1", params![run.seq])? {
                recovered.push(updated);
            }
        }

        tx.commit()?;
        Ok(recovered)
    }

    fn prune_history_inner(&mut self, keep: usize) -> StorageResult<usize> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let deleted = self.conn.execute(
            "DELETE FROM runs
             WHERE status NOT IN ('pending', 'running')
               AND seq NOT IN (
                   SELECT seq FROM runs WHERE status NOT IN ('pending', 'running')
                   ORDER BY seq DESC LIMIT ?1)
               AND seq NOT IN (
                   SELECT seq FROM runs WHERE status = 'succeeded'
                   ORDER BY started_at DESC, seq DESC LIMIT 1)",
            params![keep],
        )?;
        Ok(deleted)
    }
}

impl RunStore for SqliteRunStore {
    fn create(&mut self, trigger: TriggerSource, at: DateTime<Utc>) -> StorageResult<RunId> {
        let policy = self.retry;
        retry_transient(&policy, || self.create_inner(trigger, at))
    }

    fn create_if_idle(
        &mut self,
        trigger: TriggerSource,
        at: DateTime<Utc>,
        quiet_since: Option<DateTime<Utc>>,
    ) -> StorageResult<AdmitOutcome> {
        let policy = self.retry;
        retry_transient(&policy, || {
            self.create_if_idle_inner(trigger, at, quiet_since)
        })
    }

    fn transition(
        &mut self,
        run_id: &RunId,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> StorageResult<RunRecord> {
        let policy = self.retry;
        retry_transient(&policy, || self.transition_inner(run_id, &transition, at))
    }

    fn recover_unfinished(&mut self, at: DateTime<Utc>) -> StorageResult<Vec<RunRecord>> {
        let policy = self.retry;
        retry_transient(&policy, || self.recover_unfinished_inner(at))
    }

    fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        retry_transient(&self.retry, || {
            query_run(&self.conn, "WHERE run_id = ?1", params![run_id.as_str()])
        })?
        .ok_or_else(|| StorageError::NotFound(run_id.clone()))
    }

    fn latest_succeeded(&self) -> StorageResult<Option<RunRecord>> {
        retry_transient(&self.retry, || {
            query_run(
                &self.conn,
                "WHERE status = 'succeeded' ORDER BY started_at DESC, seq DESC LIMIT 1",
                [],
            )
        })
    }

    fn latest_terminal(&self) -> StorageResult<Option<RunRecord>> {
        retry_transient(&self.retry, || {
            query_run(
                &self.conn,
                "WHERE finished_at IS NOT NULL ORDER BY finished_at DESC, seq DESC LIMIT 1",
                [],
            )
        })
    }

    fn current_running(&self) -> StorageResult<Option<RunRecord>> {
        retry_transient(&self.retry, || {
            query_run(&self.conn, "WHERE status = 'running' LIMIT 1", [])
        })
    }

    fn oldest_pending(&self) -> StorageResult<Option<RunRecord>> {
        retry_transient(&self.retry, || {
            query_run(&self.conn, "WHERE status = 'pending' ORDER BY seq ASC LIMIT 1", [])
        })
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        retry_transient(&self.retry, || {
            query_runs(&self.conn, "ORDER BY seq DESC LIMIT ?1", params![limit])
        })
    }

    fn prune_history(&mut self, keep: usize) -> StorageResult<usize> {
        let policy = self.retry;
        retry_transient(&policy, || self.prune_history_inner(keep))
    }

    fn ping(&self) -> StorageResult<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Raw column values of a `runs` row, before validation
struct RawRun {
    seq: i64,
    run_id: String,
    status: String,
    trigger_source: String,
    config_hash: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    result_ref: Option<String>,
    error_detail: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            run_id: row.get(1)?,
            status: row.get(2)?,
            trigger_source: row.get(3)?,
            config_hash: row.get(4)?,
            created_at: row.get(5)?,
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
            result_ref: row.get(8)?,
            error_detail: row.get(9)?,
        })
    }

    fn into_record(self) -> StorageResult<RunRecord> {
        let trigger_source = TriggerSource::from_db_string(&self.trigger_source).ok_or_else(|| {
            StorageError::Corrupt(format!("unknown trigger source '{}'", self.trigger_source))
        })?;

        Ok(RunRecord {
            run_id: RunId::from(self.run_id),
            seq: self.seq,
            status: parse_status(&self.status)?,
            trigger_source,
            config_hash: self.config_hash,
            created_at: parse_timestamp(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
            result_ref: self.result_ref,
            error_detail: self.error_detail,
        })
    }
}

fn parse_status(value: &str) -> StorageResult<RunStatus> {
    RunStatus::from_db_string(value)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown run status '{}'", value)))
}

fn query_run<P: Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> StorageResult<Option<RunRecord>> {
    let sql = format!("SELECT {} FROM runs {}", RUN_COLUMNS, clause);
    conn.query_row(&sql, params, RawRun::from_row)
        .optional()?
        .map(RawRun::into_record)
        .transpose()
}

fn query_runs<P: Params>(conn: &Connection, clause: &str, params: P) -> StorageResult<Vec<RunRecord>> {
    let sql = format!("SELECT {} FROM runs {}", RUN_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params, RawRun::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawRun::into_record).collect()
}

fn insert_pending(
    conn: &Connection,
    trigger: TriggerSource,
    config_hash: &str,
    at: DateTime<Utc>,
) -> StorageResult<RunRecord> {
    let run_id = RunId::generate();
    let created_at = format_timestamp(at);
    conn.execute(
        "INSERT INTO runs (run_id, status, trigger_source, config_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run_id.as_str(),
            RunStatus::Pending.to_db_string(),
            trigger.to_db_string(),
            config_hash,
            created_at
        ],
    )?;

    Ok(RunRecord {
        run_id,
        seq: conn.last_insert_rowid(),
        status: RunStatus::Pending,
        trigger_source: trigger,
        config_hash: config_hash.to_string(),
        created_at: parse_timestamp(&created_at)?,
        started_at: None,
        finished_at: None,
        result_ref: None,
        error_detail: None,
    })
}
