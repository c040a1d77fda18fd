//! State module for tracking run progress
//!
//! # Components
//!
//! - `RunStatus`: The status of a single run and its legal transitions
//! - `TriggerSource`: Whether a run was requested by the scheduler or an operator

mod run_status;
mod trigger;

// Re-export main types
pub use run_status::RunStatus;
pub use trigger::TriggerSource;
