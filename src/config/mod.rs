//! Configuration module for Runkeeper
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use runkeeper::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("runkeeper.toml")).unwrap();
//! println!("Service will listen on port {}", config.server.port);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, ExtractorConfig, NotifyConfig, ScheduleConfig, ServerConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{parse_fire_time, parse_timezone};
