/// Run status definitions and the legal transitions between them
///
/// This module defines every status a run record can hold and which
/// status changes the store is allowed to apply.
use serde::Serialize;
use std::fmt;

/// Represents the current status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    // ===== Active States =====
    /// Run was admitted but the work has not started yet
    Pending,

    /// The extraction work is executing
    Running,

    // ===== Terminal States =====
    /// Work completed and produced an artifact reference
    Succeeded,

    /// Work completed with a diagnostic
    Failed,

    /// Work was forcibly stopped at its deadline
    TimedOut,

    /// The process that owned the run died before it finished
    Abandoned,
}

impl RunStatus {
    /// Returns true if this is a terminal state (no further transitions)
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if the run still occupies the single execution slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// `pending -> running -> {succeeded, failed, timed_out}`, plus
    /// `pending -> abandoned` for a run that never started. Running runs are
    /// only abandoned by startup recovery, which bypasses this check.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Abandoned)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::TimedOut)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Running,
            Self::Succeeded,
            Self::Failed,
            Self::TimedOut,
            Self::Abandoned,
        ]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
