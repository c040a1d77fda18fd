//! Run execution
//!
//! The runner drives one admitted run from `pending` to a terminal status
//! under a deadline. The dispatcher couples it to the gate so that callers
//! get the admission decision immediately while the work runs in the
//! background.

mod work;

pub use work::{CommandWork, ExtractionWork, WorkOutcome, RUN_ID_ENV};

use crate::gate::{Admission, ScheduleGate};
use crate::notify::Notifier;
use crate::state::{RunStatus, TriggerSource};
use crate::storage::{RunId, RunRecord, StorageError, StorageResult, StoreHandle, Transition};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Executes admitted runs and records their outcomes
#[derive(Clone)]
pub struct ExtractionRunner {
    store: StoreHandle,
    work: Arc<dyn ExtractionWork>,
    timeout: Duration,
    history_limit: Option<usize>,
    notifier: Option<Notifier>,
}

impl ExtractionRunner {
    pub fn new(store: StoreHandle, work: Arc<dyn ExtractionWork>, timeout: Duration) -> Self {
        Self {
            store,
            work,
            timeout,
            history_limit: None,
            notifier: None,
        }
    }

    /// Prunes history down to `limit` terminal runs after each run
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Deadline applied to runs started with [`ExtractionRunner::spawn`]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Executes a pending run to completion
    ///
    /// The run moves to `running`, the work is invoked, and exactly one
    /// terminal transition is recorded: `succeeded`, `failed`, or
    /// `timed_out` if `deadline` passes first. In the timeout case the work
    /// future is dropped, which stops it.
    ///
    /// Returns the terminal record. If the start cannot be recorded the run
    /// is moved to `abandoned` so it stops holding the slot. A store error
    /// while recording the outcome leaves the run `running`; startup
    /// recovery abandons it later.
    pub async fn execute(&self, run_id: &RunId, deadline: Duration) -> StorageResult<RunRecord> {
        let started = match self
            .store
            .with(|store| store.transition(run_id, Transition::Start, Utc::now()))
        {
            Ok(run) => run,
            Err(e) => {
                self.abandon_unstarted(run_id, &e);
                return Err(e);
            }
        };
        tracing::info!(
            "Run {} started ({}, deadline {}s)",
            run_id,
            started.trigger_source,
            deadline.as_secs()
        );

        let transition = match tokio::time::timeout(deadline, self.work.run(run_id)).await {
            Ok(WorkOutcome::Succeeded { result_ref }) => Transition::Succeed { result_ref },
            Ok(WorkOutcome::Failed { diagnostic }) => Transition::Fail {
                error_detail: diagnostic,
            },
            Err(_) => Transition::TimeOut {
                error_detail: format!("no outcome within deadline of {}s", deadline.as_secs()),
            },
        };

        let finished = self
            .store
            .with(|store| store.transition(run_id, transition, Utc::now()))
            .map_err(|e| {
                tracing::error!("Failed to record outcome of run {}: {}", run_id, e);
                e
            })?;

        match finished.status {
            RunStatus::Succeeded => tracing::info!(
                "Run {} succeeded: {}",
                run_id,
                finished.result_ref.as_deref().unwrap_or_default()
            ),
            status => tracing::warn!(
                "Run {} {}: {}",
                run_id,
                status,
                finished.error_detail.as_deref().unwrap_or_default()
            ),
        }

        self.after_terminal(&finished).await;
        Ok(finished)
    }

    /// Executes a pending run in a background task under the configured deadline
    pub fn spawn(&self, run_id: RunId) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.execute(&run_id, runner.timeout).await {
                tracing::error!("Run {} did not complete cleanly: {}", run_id, e);
            }
        })
    }

    fn abandon_unstarted(&self, run_id: &RunId, cause: &StorageError) {
        // Nothing to release for a run that is missing or already past pending
        if matches!(
            cause,
            StorageError::NotFound(_) | StorageError::InvalidTransition { .. }
        ) {
            return;
        }

        match self
            .store
            .with(|store| store.transition(run_id, Transition::Abandon, Utc::now()))
        {
            Ok(_) => tracing::warn!("Run {} abandoned, could not start: {}", run_id, cause),
            Err(e) => tracing::error!(
                "Run {} could not start ({}) and could not be abandoned: {}",
                run_id,
                cause,
                e
            ),
        }
    }

    async fn after_terminal(&self, run: &RunRecord) {
        if let Some(limit) = self.history_limit {
            match self.store.with(|store| store.prune_history(limit)) {
                Ok(0) => {}
                Ok(deleted) => tracing::debug!("Pruned {} old runs", deleted),
                Err(e) => tracing::warn!("Failed to prune run history: {}", e),
            }
        }

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(run).await {
                tracing::warn!("Failed to notify about run {}: {}", run.run_id, e);
            }
        }
    }
}

/// Admission followed by background execution
#[derive(Clone)]
pub struct Dispatcher {
    gate: ScheduleGate,
    runner: ExtractionRunner,
}

impl Dispatcher {
    pub fn new(gate: ScheduleGate, runner: ExtractionRunner) -> Self {
        Self { gate, runner }
    }

    /// Requests a run and, if admitted, starts it in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self, source: TriggerSource) -> StorageResult<Admission> {
        let admission = self.gate.request_run(source)?;
        if let Admission::Admitted(run_id) = &admission {
            self.runner.spawn(run_id.clone());
        }
        Ok(admission)
    }

    pub fn runner(&self) -> &ExtractionRunner {
        &self.runner
    }
}
