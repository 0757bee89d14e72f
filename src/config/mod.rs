//! Configuration management for MediaBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIABOX__<section>__<key>`
//!
//! Examples:
//! - `MEDIABOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIABOX__STORAGE__PROVIDER=s3`
//! - `MEDIABOX__PROVIDER__TIMEOUT_SECS=120`
//!
//! Secrets (provider API token, S3 credentials) are only read from the
//! environment: `MEDIABOX_PROVIDER_TOKEN` / `REPLICATE_API_TOKEN` and
//! `S3_ACCESS_KEY` / `S3_SECRET_KEY` (or the AWS-style names).
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediabox.toml`.
//! This can be overridden using the `MEDIABOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use models::{
    AppConfig, AppEnv, Config, CorsConfig, ProviderConfig, QueueConfig, RetentionConfig,
    RetryConfig, ServerConfig, StorageConfig, StorageProvider,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`MEDIABOX__*`)
    /// 2. TOML file (default: `config/mediabox.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
