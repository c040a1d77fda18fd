use crate::config::types::{
    Config, ExtractorConfig, NotifyConfig, ScheduleConfig, ServerConfig, StorageConfig,
};
use crate::ConfigError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use url::Url;

/// Longest per-run deadline accepted (one day)
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Longest minimum interval between runs accepted (one week)
const MAX_MINIMUM_INTERVAL_SECS: u64 = 604_800;

/// Upper bound on transient retries, so a wedged database surfaces quickly
const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server_config(&config.server)?;
    validate_storage_config(&config.storage)?;
    validate_schedule_config(&config.schedule)?;
    validate_extractor_config(&config.extractor)?;
    if let Some(notify) = &config.notify {
        validate_notify_config(notify)?;
    }
    Ok(())
}

/// Parses a daily fire time in `HH:MM` form
pub fn parse_fire_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidFireTime(value.to_string()))
}

/// Parses an IANA timezone name such as `America/New_York`
pub fn parse_timezone(value: &str) -> Result<Tz, ConfigError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(value.to_string()))
}

fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.port == 0 {
        return Err(ConfigError::Validation("port must be >= 1".to_string()));
    }

    if config.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation(
            "bind_address cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.retry_attempts > MAX_RETRY_ATTEMPTS {
        return Err(ConfigError::Validation(format!(
            "retry_attempts must be <= {}, got {}",
            MAX_RETRY_ATTEMPTS, config.retry_attempts
        )));
    }

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(
            "max_consecutive_failures must be >= 1".to_string(),
        ));
    }

    if config.history_limit == Some(0) {
        return Err(ConfigError::Validation(
            "history_limit must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    parse_fire_time(&config.fire_time)?;
    parse_timezone(&config.timezone)?;

    if config.minimum_interval_secs > MAX_MINIMUM_INTERVAL_SECS {
        return Err(ConfigError::Validation(format!(
            "minimum_interval_secs must be <= {}, got {}",
            MAX_MINIMUM_INTERVAL_SECS, config.minimum_interval_secs
        )));
    }

    Ok(())
}

fn validate_extractor_config(config: &ExtractorConfig) -> Result<(), ConfigError> {
    if config.command.trim().is_empty() {
        return Err(ConfigError::Validation(
            "extractor command cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 || config.timeout_secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be between 1 and {}, got {}",
            MAX_TIMEOUT_SECS, config.timeout_secs
        )));
    }

    if let Some(key) = config.env.keys().find(|k| k.is_empty() || k.contains('=')) {
        return Err(ConfigError::Validation(format!(
            "Invalid environment variable name '{}'",
            key
        )));
    }

    Ok(())
}

fn validate_notify_config(config: &NotifyConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.webhook_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid webhook_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "webhook_url '{}' must use http or https",
            config.webhook_url
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "notify timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}
