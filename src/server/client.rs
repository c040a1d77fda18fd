//! Client for `POST /run` on a running service
//!
//! Lets a cron entry trigger a run through the service instead of starting
//! the extraction itself.

use crate::server::RunRequest;
use crate::state::TriggerSource;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// What the service answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReply {
    Admitted { run_id: String },
    Rejected { reason: String, detail: String },
}

/// Requests a run from the service at `base_url`
pub async fn request_remote_run(
    base_url: &str,
    source: TriggerSource,
) -> Result<TriggerReply, ClientError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("runkeeper/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let url = format!("{}/run", base_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .json(&RunRequest { source })
        .send()
        .await?;

    let status = response.status();
    match status {
        StatusCode::ACCEPTED => {
            let body: Value = response.json().await?;
            Ok(TriggerReply::Admitted {
                run_id: field(&body, "run_id"),
            })
        }
        StatusCode::CONFLICT => {
            let body: Value = response.json().await?;
            Ok(TriggerReply::Rejected {
                reason: field(&body, "reason"),
                detail: field(&body, "detail"),
            })
        }
        _ => Err(ClientError::UnexpectedStatus {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }),
    }
}

fn field(body: &Value, name: &str) -> String {
    body.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
