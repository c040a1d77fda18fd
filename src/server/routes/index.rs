use axum::Json;
use serde_json::{json, Value};

/// Service index
pub async fn index_handler() -> Json<Value> {
    Json(json!({
        "name": "runkeeper",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "status": "GET /status",
            "trigger": "POST /run",
            "history": "GET /runs?limit=N",
            "run": "GET /runs/{run_id}"
        }
    }))
}
