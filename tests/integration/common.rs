use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use runkeeper::gate::{AdmissionPolicy, ScheduleGate};
use runkeeper::runner::{Dispatcher, ExtractionRunner, ExtractionWork, WorkOutcome};
use runkeeper::server::{build_router, AppState};
use runkeeper::storage::{
    AdmitOutcome, RunId, RunRecord, RunStore, SqliteRunStore, StorageError, StorageResult,
    StoreHandle, Transition,
};
use runkeeper::{RunStatus, TriggerSource};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Work that finishes with a fixed outcome once released
pub struct GatedWork {
    pub release: Arc<Notify>,
    pub outcome: WorkOutcome,
}

impl GatedWork {
    pub fn succeeding(result_ref: &str) -> (Arc<Self>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let work = Arc::new(Self {
            release: release.clone(),
            outcome: WorkOutcome::Succeeded {
                result_ref: result_ref.to_string(),
            },
        });
        (work, release)
    }
}

#[async_trait]
impl ExtractionWork for GatedWork {
    async fn run(&self, _run_id: &RunId) -> WorkOutcome {
        self.release.notified().await;
        self.outcome.clone()
    }
}

/// Work that succeeds immediately
pub struct InstantWork(pub &'static str);

#[async_trait]
impl ExtractionWork for InstantWork {
    async fn run(&self, _run_id: &RunId) -> WorkOutcome {
        WorkOutcome::Succeeded {
            result_ref: self.0.to_string(),
        }
    }
}

/// Work that never finishes on its own
pub struct HangingWork;

#[async_trait]
impl ExtractionWork for HangingWork {
    async fn run(&self, _run_id: &RunId) -> WorkOutcome {
        std::future::pending().await
    }
}

/// A store whose backing database is gone
pub struct FailingStore;

fn unavailable<T>() -> StorageResult<T> {
    Err(StorageError::Unavailable(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
        Some("unable to open database file".to_string()),
    )))
}

impl RunStore for FailingStore {
    fn create(&mut self, _: TriggerSource, _: DateTime<Utc>) -> StorageResult<RunId> {
        unavailable()
    }

    fn create_if_idle(
        &mut self,
        _: TriggerSource,
        _: DateTime<Utc>,
        _: Option<DateTime<Utc>>,
    ) -> StorageResult<AdmitOutcome> {
        unavailable()
    }

    fn transition(&mut self, _: &RunId, _: Transition, _: DateTime<Utc>) -> StorageResult<RunRecord> {
        unavailable()
    }

    fn recover_unfinished(&mut self, _: DateTime<Utc>) -> StorageResult<Vec<RunRecord>> {
        unavailable()
    }

    fn get_run(&self, _: &RunId) -> StorageResult<RunRecord> {
        unavailable()
    }

    fn latest_succeeded(&self) -> StorageResult<Option<RunRecord>> {
        unavailable()
    }

    fn latest_terminal(&self) -> StorageResult<Option<RunRecord>> {
        unavailable()
    }

    fn current_running(&self) -> StorageResult<Option<RunRecord>> {
        unavailable()
    }

    fn oldest_pending(&self) -> StorageResult<Option<RunRecord>> {
        unavailable()
    }

    fn recent_runs(&self, _: usize) -> StorageResult<Vec<RunRecord>> {
        unavailable()
    }

    fn prune_history(&mut self, _: usize) -> StorageResult<usize> {
        unavailable()
    }

    fn ping(&self) -> StorageResult<()> {
        unavailable()
    }
}

/// A working store with injected faults
pub struct FaultyStore {
    inner: SqliteRunStore,
    failing_starts: u32,
    corrupt_ping: bool,
}

impl FaultyStore {
    /// Fails the next `count` start transitions with an I/O error
    pub fn failing_starts(count: u32) -> Self {
        Self {
            inner: SqliteRunStore::new_in_memory().unwrap(),
            failing_starts: count,
            corrupt_ping: false,
        }
    }

    /// Reachable, but every health ping reports a corrupt record
    pub fn corrupt() -> Self {
        Self {
            inner: SqliteRunStore::new_in_memory().unwrap(),
            failing_starts: 0,
            corrupt_ping: true,
        }
    }
}

impl RunStore for FaultyStore {
    fn create(&mut self, source: TriggerSource, now: DateTime<Utc>) -> StorageResult<RunId> {
        self.inner.create(source, now)
    }

    fn create_if_idle(
        &mut self,
        source: TriggerSource,
        now: DateTime<Utc>,
        not_finished_since: Option<DateTime<Utc>>,
    ) -> StorageResult<AdmitOutcome> {
        self.inner.create_if_idle(source, now, not_finished_since)
    }

    fn transition(
        &mut self,
        run_id: &RunId,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> StorageResult<RunRecord> {
        if matches!(transition, Transition::Start) && self.failing_starts > 0 {
            self.failing_starts -= 1;
            return Err(StorageError::Unavailable(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                Some("disk I/O error".to_string()),
            )));
        }
        self.inner.transition(run_id, transition, now)
    }

    fn recover_unfinished(&mut self, now: DateTime<Utc>) -> StorageResult<Vec<RunRecord>> {
        self.inner.recover_unfinished(now)
    }

    fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id)
    }

    fn latest_succeeded(&self) -> StorageResult<Option<RunRecord>> {
        self.inner.latest_succeeded()
    }

    fn latest_terminal(&self) -> StorageResult<Option<RunRecord>> {
        self.inner.latest_terminal()
    }

    fn current_running(&self) -> StorageResult<Option<RunRecord>> {
        self.inner.current_running()
    }

    fn oldest_pending(&self) -> StorageResult<Option<RunRecord>> {
        self.inner.oldest_pending()
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.inner.recent_runs(limit)
    }

    fn prune_history(&mut self, keep: usize) -> StorageResult<usize> {
        self.inner.prune_history(keep)
    }

    fn ping(&self) -> StorageResult<()> {
        if self.corrupt_ping {
            return Err(StorageError::Corrupt("unknown status 'paused'".to_string()));
        }
        self.inner.ping()
    }
}

pub struct Harness {
    pub store: StoreHandle,
    pub state: AppState,
    pub router: Router,
}

/// Wires a service around `work` with an in-memory store
pub fn harness(work: Arc<dyn ExtractionWork>, deadline: Duration, minimum_interval: Duration) -> Harness {
    let store = StoreHandle::new(SqliteRunStore::new_in_memory().unwrap());
    harness_with_store(store, work, deadline, minimum_interval)
}

pub fn harness_with_store(
    store: StoreHandle,
    work: Arc<dyn ExtractionWork>,
    deadline: Duration,
    minimum_interval: Duration,
) -> Harness {
    let gate = ScheduleGate::new(
        store.clone(),
        AdmissionPolicy {
            minimum_interval,
            manual_bypasses_interval: true,
        },
    );
    let runner = ExtractionRunner::new(store.clone(), work, deadline);
    let state = AppState::new(store.clone(), Dispatcher::new(gate, runner), 3);
    let router = build_router(state.clone());

    Harness {
        store,
        state,
        router,
    }
}

/// Sends one request and returns the status and JSON body
pub async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Polls the store until the run reaches `status`
pub async fn wait_for_status(store: &StoreHandle, run_id: &RunId, status: RunStatus) -> RunRecord {
    for _ in 0..500 {
        let run = store.with(|s| s.get_run(run_id)).unwrap();
        if run.status == status {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} never reached {}", run_id, status);
}
