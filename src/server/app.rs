use crate::runner::Dispatcher;
use crate::server::routes::{
    get_run_handler, health_handler, index_handler, list_runs_handler, run_handler,
    status_handler,
};
use crate::storage::{StorageResult, StoreHandle};
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub dispatcher: Dispatcher,
    pub budget: Arc<FailureBudget>,
}

impl AppState {
    pub fn new(store: StoreHandle, dispatcher: Dispatcher, max_consecutive_failures: u32) -> Self {
        Self {
            store,
            dispatcher,
            budget: Arc::new(FailureBudget::new(max_consecutive_failures)),
        }
    }

    /// Counts a store result against the failure budget and passes it on
    pub fn observe<T>(&self, result: StorageResult<T>) -> StorageResult<T> {
        match &result {
            Err(e) if e.is_unavailable() => self.budget.record_failure(),
            _ => self.budget.record_success(),
        }
        result
    }
}

/// Consecutive store failures tolerated before the service gives up
///
/// Any successful store access resets the count. Reaching the limit wakes
/// [`FailureBudget::exhausted`], which the server uses as a shutdown signal.
/// Once reached the budget stays exhausted, even if later accesses succeed.
#[derive(Debug)]
pub struct FailureBudget {
    max: u32,
    consecutive: AtomicU32,
    tripped: AtomicBool,
    exhausted: Notify,
}

impl FailureBudget {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            consecutive: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
            exhausted: Notify::new(),
        }
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            "Run store failure {} of {} tolerated",
            failures,
            self.max
        );
        if failures >= self.max && !self.tripped.swap(true, Ordering::SeqCst) {
            self.exhausted.notify_one();
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Resolves once the budget has been used up
    pub async fn exhausted(&self) {
        if self.is_exhausted() {
            return;
        }
        self.exhausted.notified().await;
    }
}

/// Builds the HTTP router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/run", post(run_handler))
        .route("/runs", get(list_runs_handler))
        .route("/runs/:run_id", get(get_run_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
