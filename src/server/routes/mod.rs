mod health;
mod index;
mod runs;

pub use health::{assess_health, health_handler, HealthResponse, StoreHealth};
pub use index::index_handler;
pub use runs::{
    get_run_handler, list_runs_handler, run_handler, status_handler, RunRequest, StatusResponse,
};
