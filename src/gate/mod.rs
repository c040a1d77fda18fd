//! Admission control for new runs
//!
//! The gate decides whether a trigger may start a run right now. It owns no
//! state: the decision and the insert of the new run happen in a single
//! store operation, so two concurrent requests can never both be admitted.

use crate::config::ScheduleConfig;
use crate::state::TriggerSource;
use crate::storage::{AdmitOutcome, RunId, StorageResult, StoreHandle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a run request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Another run is pending or running
    AlreadyRunning,

    /// A run finished less than the minimum interval ago
    TooSoon,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already_running"),
            Self::TooSoon => write!(f, "too_soon"),
        }
    }
}

/// Decision for one run request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new pending run was created
    Admitted(RunId),

    /// No run was created
    Rejected {
        reason: RejectReason,
        /// The run that caused the rejection
        blocking_run: RunId,
        detail: String,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::Admitted(run_id) => Some(run_id),
            Self::Rejected { .. } => None,
        }
    }
}

/// Minimum-interval policy applied at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub minimum_interval: Duration,
    pub manual_bypasses_interval: bool,
}

impl AdmissionPolicy {
    /// Returns the instant after which a finished run blocks this trigger
    fn quiet_since(&self, trigger: TriggerSource, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.minimum_interval.is_zero() {
            return None;
        }
        if trigger == TriggerSource::Manual && self.manual_bypasses_interval {
            return None;
        }
        let window = chrono::Duration::from_std(self.minimum_interval).ok();
        Some(
            window
                .and_then(|w| now.checked_sub_signed(w))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }
}

impl From<&ScheduleConfig> for AdmissionPolicy {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            minimum_interval: config.minimum_interval(),
            manual_bypasses_interval: config.manual_bypasses_interval,
        }
    }
}

/// Admission control for run requests, regardless of who triggers them
#[derive(Clone)]
pub struct ScheduleGate {
    store: StoreHandle,
    policy: AdmissionPolicy,
}

impl ScheduleGate {
    pub fn new(store: StoreHandle, policy: AdmissionPolicy) -> Self {
        Self { store, policy }
    }

    /// Requests a new run at the current time
    pub fn request_run(&self, trigger: TriggerSource) -> StorageResult<Admission> {
        self.request_run_at(trigger, Utc::now())
    }

    /// Requests a new run as of `now`
    ///
    /// Store errors are returned unchanged; the gate never retries, so a
    /// failed request can never turn into two runs.
    pub fn request_run_at(
        &self,
        trigger: TriggerSource,
        now: DateTime<Utc>,
    ) -> StorageResult<Admission> {
        let quiet_since = self.policy.quiet_since(trigger, now);
        let outcome = self
            .store
            .with(|store| store.create_if_idle(trigger, now, quiet_since))?;

        let admission = match outcome {
            AdmitOutcome::Created(run) => {
                tracing::info!("Admitted {} run {}", trigger, run.run_id);
                Admission::Admitted(run.run_id)
            }
            AdmitOutcome::Active(active) => {
                let detail = format!("run {} is {}", active.run_id, active.status);
                tracing::warn!("Rejected {} run request: {}", trigger, detail);
                Admission::Rejected {
                    reason: RejectReason::AlreadyRunning,
                    blocking_run: active.run_id,
                    detail,
                }
            }
            AdmitOutcome::RecentlyFinished(recent) => {
                let detail = match recent.finished_at {
                    Some(finished) => format!(
                        "run {} finished at {}, minimum interval is {}s",
                        recent.run_id,
                        finished.to_rfc3339(),
                        self.policy.minimum_interval.as_secs()
                    ),
                    None => format!("run {} finished recently", recent.run_id),
                };
                tracing::warn!("Rejected {} run request: {}", trigger, detail);
                Admission::Rejected {
                    reason: RejectReason::TooSoon,
                    blocking_run: recent.run_id,
                    detail,
                }
            }
        };

        Ok(admission)
    }
}
