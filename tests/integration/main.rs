//! Integration tests for Runkeeper
//!
//! These drive the HTTP router in-process, restart a file-backed store,
//! and run real commands through the runner.

mod common;
mod recovery_tests;
mod service_tests;
