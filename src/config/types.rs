use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Runkeeper
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the service binds to
    #[serde(rename = "bind-address", default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Run store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// How many times a busy/locked database operation is retried
    #[serde(rename = "retry-attempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff step between retries (milliseconds, grows linearly)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Consecutive store failures tolerated before the service exits
    #[serde(
        rename = "max-consecutive-failures",
        default = "default_max_consecutive_failures"
    )]
    pub max_consecutive_failures: u32,

    /// Number of terminal runs kept in history
    #[serde(rename = "history-limit", default)]
    pub history_limit: Option<usize>,
}

/// Admission and scheduled-trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Daily wall-clock fire time, "HH:MM"
    #[serde(rename = "fire-time")]
    pub fire_time: String,

    /// IANA timezone name the fire time is expressed in
    pub timezone: String,

    /// Minimum gap between a finished run and the next scheduled admission
    #[serde(rename = "minimum-interval-secs")]
    pub minimum_interval_secs: u64,

    /// Whether manual triggers skip the minimum-interval check
    #[serde(rename = "manual-bypasses-interval", default = "default_true")]
    pub manual_bypasses_interval: bool,

    /// Whether this process fires the daily trigger itself
    #[serde(default)]
    pub enabled: bool,
}

impl ScheduleConfig {
    pub fn minimum_interval(&self) -> Duration {
        Duration::from_secs(self.minimum_interval_secs)
    }
}

/// External extraction command configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Executable to run
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the command
    #[serde(rename = "working-dir", default)]
    pub working_dir: Option<String>,

    /// Per-run deadline in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outcome webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// URL that receives a POST per terminal run
    #[serde(rename = "webhook-url")]
    pub webhook_url: String,

    /// Bearer token sent with each notification
    #[serde(rename = "api-key", default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_max_consecutive_failures() -> u32 {
    20
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}
