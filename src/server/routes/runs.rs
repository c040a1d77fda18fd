use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::gate::Admission;
use crate::server::app::AppState;
use crate::server::error::ApiError;
use crate::state::TriggerSource;
use crate::storage::{RunId, RunRecord, StorageError};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub last_succeeded: Option<RunRecord>,
    pub current_run: Option<RunRecord>,
    pub last_finished: Option<RunRecord>,
}

/// Optional body of `POST /run`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub source: TriggerSource,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

/// Last good result and the run in progress
pub async fn status_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.observe(state.store.with(|store| {
        Ok(StatusResponse {
            last_succeeded: store.latest_succeeded()?,
            current_run: store.current_running()?,
            last_finished: store.latest_terminal()?,
        })
    }))?;

    Ok(Json(status))
}

/// Requests a new run
///
/// Returns 202 with the new `run_id` when admitted and 409 with the reason
/// when the gate turns the request away. The run itself executes in the
/// background.
pub async fn run_handler(
    Extension(state): Extension<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice::<RunRequest>(&body).map_err(|e| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", e),
            )
        })?
    };
    tracing::debug!("Run requested ({})", request.source);

    let admission = state.observe(state.dispatcher.trigger(request.source))?;

    let response = match admission {
        Admission::Admitted(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "admitted", "run_id": run_id })),
        ),
        Admission::Rejected {
            reason,
            blocking_run,
            detail,
        } => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "rejected",
                "reason": reason,
                "detail": detail,
                "blocking_run_id": blocking_run,
            })),
        ),
    };

    Ok(response)
}

/// Recent runs, newest first
pub async fn list_runs_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let runs = state.observe(state.store.with(|store| store.recent_runs(limit)))?;

    Ok(Json(json!({ "runs": runs })))
}

/// One run by ID
pub async fn get_run_handler(
    Extension(state): Extension<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let run_id = RunId::from(run_id);
    match state.observe(state.store.with(|store| store.get_run(&run_id))) {
        Ok(run) => Ok(Json(run)),
        Err(StorageError::NotFound(_)) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Run not found: {}", run_id),
        )),
        Err(e) => Err(e.into()),
    }
}
