use axum::{extract::Extension, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::server::app::AppState;
use crate::storage::{RunRecord, StorageResult, StoreHandle};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub store: StoreHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_run: Option<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.reason.is_none()
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

struct HealthSnapshot {
    current_run: Option<RunRecord>,
    oldest_pending: Option<RunRecord>,
    last_success: Option<RunRecord>,
}

fn read_snapshot(store: &StoreHandle) -> StorageResult<HealthSnapshot> {
    store.with(|store| {
        store.ping()?;
        Ok(HealthSnapshot {
            current_run: store.current_running()?,
            oldest_pending: store.oldest_pending()?,
            last_success: store.latest_succeeded()?,
        })
    })
}

/// Assesses service health as of `now`
///
/// Unhealthy when the run store cannot be queried, when the current run
/// has been `running` for longer than `deadline`, or when a run admitted
/// more than `deadline` ago has still not started.
pub fn assess_health(store: &StoreHandle, deadline: Duration, now: DateTime<Utc>) -> HealthResponse {
    evaluate(read_snapshot(store), deadline, now)
}

fn evaluate(
    snapshot: StorageResult<HealthSnapshot>,
    deadline: Duration,
    now: DateTime<Utc>,
) -> HealthResponse {
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!("Health check could not query run store: {}", e);
            return HealthResponse {
                status: "unhealthy".to_string(),
                timestamp: now,
                store: StoreHealth {
                    status: "error".to_string(),
                    error: Some(e.to_string()),
                },
                current_run: None,
                reason: Some("run store unavailable".to_string()),
                last_success_at: None,
            };
        }
    };

    let overdue = snapshot.current_run.as_ref().and_then(|run| {
        let elapsed = run.running_for(now)?.to_std().ok()?;
        (elapsed > deadline).then(|| {
            format!(
                "run {} has been running for {}s, past its {}s deadline",
                run.run_id,
                elapsed.as_secs(),
                deadline.as_secs()
            )
        })
    });
    let never_started = snapshot.oldest_pending.as_ref().and_then(|run| {
        let waited = run.pending_for(now)?.to_std().ok()?;
        (waited > deadline).then(|| {
            format!(
                "run {} was admitted {}s ago and never started",
                run.run_id,
                waited.as_secs()
            )
        })
    });

    let reason = overdue.or(never_started);
    if let Some(reason) = &reason {
        tracing::warn!("Health check: {}", reason);
    }

    HealthResponse {
        status: if reason.is_none() { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: now,
        store: StoreHealth {
            status: "ok".to_string(),
            error: None,
        },
        current_run: snapshot.current_run,
        reason,
        last_success_at: snapshot.last_success.and_then(|run| run.finished_at),
    }
}

/// Health check endpoint
///
/// Returns 200 OK when the run store is reachable and no run is stuck,
/// 503 Service Unavailable otherwise. Only an unreachable store counts
/// against the failure budget.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let deadline = state.dispatcher.runner().timeout();
    let snapshot = state.observe(read_snapshot(&state.store));
    let health = evaluate(snapshot, deadline, Utc::now());

    (health.status_code(), Json(health))
}
