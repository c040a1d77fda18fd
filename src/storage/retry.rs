//! Bounded retry for transient storage errors

use crate::storage::traits::StorageResult;
use std::time::Duration;

/// How busy/locked database operations are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub attempts: u32,

    /// Backoff step; the n-th retry waits `n * backoff`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

/// Runs `op`, retrying it while it fails with a transient error
///
/// The store is synchronous, so the backoff blocks the calling thread.
pub fn retry_transient<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> StorageResult<T>,
) -> StorageResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                attempt += 1;
                tracing::warn!(
                    "Transient storage error (attempt {}/{}): {}",
                    attempt,
                    policy.attempts,
                    e
                );
                std::thread::sleep(policy.backoff * attempt);
            }
            result => return result,
        }
    }
}
