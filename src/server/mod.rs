//! HTTP service front
//!
//! The long-lived process boundary: health and status read from the run
//! store, `POST /run` goes through the gate, and startup recovery runs
//! before the listener accepts any traffic.

mod app;
mod client;
mod error;
mod routes;

pub use app::{build_router, AppState, FailureBudget};
pub use client::{request_remote_run, ClientError, TriggerReply};
pub use error::ApiError;
pub use routes::{assess_health, HealthResponse, RunRequest, StatusResponse, StoreHealth};

use crate::storage::{RunRecord, StorageResult, StoreHandle};
use crate::{KeeperError, Result};
use chrono::Utc;
use tokio::net::TcpListener;

/// Abandons every run a previous process left pending or running
///
/// Must complete before the service admits any new run.
pub fn startup_recovery(store: &StoreHandle) -> StorageResult<Vec<RunRecord>> {
    let recovered = store.with(|store| store.recover_unfinished(Utc::now()))?;

    for run in &recovered {
        tracing::warn!(
            "Abandoned run {} ({}, created {}) left unfinished by a previous process",
            run.run_id,
            run.trigger_source,
            run.created_at.to_rfc3339()
        );
    }
    if recovered.is_empty() {
        tracing::info!("Startup recovery: no unfinished runs");
    }

    Ok(recovered)
}

/// Serves HTTP on `listener` until Ctrl-C or the store failure budget runs out
///
/// Returns [`KeeperError::StoreBudgetExhausted`] in the second case. Runs
/// still executing at shutdown are abandoned by the next startup recovery.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let budget = state.budget.clone();
    let app = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Listening on http://{}", addr);
    }

    let signal_budget = budget.clone();
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down");
            }
            _ = signal_budget.exhausted() => {
                tracing::error!("Run store failure budget exhausted, shutting down");
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    if budget.is_exhausted() {
        return Err(KeeperError::StoreBudgetExhausted {
            failures: budget.limit(),
        });
    }

    Ok(())
}
