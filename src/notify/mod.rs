//! Outcome notifications
//!
//! When configured, every terminal run is POSTed as JSON to a webhook so
//! downstream consumers learn about new results without polling `/status`.

use crate::config::NotifyConfig;
use crate::state::{RunStatus, TriggerSource};
use crate::storage::{RunId, RunRecord};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected notification with HTTP {status}")]
    Rejected { status: u16 },
}

/// Body POSTed to the webhook
#[derive(Debug, Serialize)]
pub struct RunOutcome<'a> {
    pub event: &'static str,
    pub run_id: &'a RunId,
    pub status: RunStatus,
    pub trigger_source: TriggerSource,
    pub result_ref: Option<&'a str>,
    pub error_detail: Option<&'a str>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a RunRecord> for RunOutcome<'a> {
    fn from(run: &'a RunRecord) -> Self {
        Self {
            event: "run.finished",
            run_id: &run.run_id,
            status: run.status,
            trigger_source: run.trigger_source,
            result_ref: run.result_ref.as_deref(),
            error_detail: run.error_detail.as_deref(),
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }
}

/// Webhook client for run outcomes
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: String,
    api_key: Option<String>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("runkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Sends the outcome of a finished run
    pub async fn notify(&self, run: &RunRecord) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&self.webhook_url)
            .json(&RunOutcome::from(run));

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!("Notified webhook about run {} ({})", run.run_id, run.status);
        Ok(())
    }
}
