use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIABOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediabox.toml";
const ENV_PREFIX: &str = "MEDIABOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    // Load secrets from environment variables
    load_secrets(&mut config);

    Ok(config)
}

/// Load secrets from environment variables into config
/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    // Provider API token
    if let Ok(token) = env::var("MEDIABOX_PROVIDER_TOKEN") {
        config.provider.api_token = Some(token);
    }
    if config.provider.api_token.is_none() {
        if let Ok(token) = env::var("REPLICATE_API_TOKEN") {
            config.provider.api_token = Some(token);
        }
    }
    // Empty token means "no token"
    if config
        .provider
        .api_token
        .as_ref()
        .is_some_and(|t| t.is_empty())
    {
        config.provider.api_token = None;
    }

    // S3 credentials
    if let Ok(access_key) = env::var("S3_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("S3_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }

    // Alternative: AWS-style environment variable names
    if config.storage.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.storage.access_key = Some(access_key);
        }
    }
    if config.storage.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.storage.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Add TOML file if it exists (optional)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // Add environment variable overrides
    // MEDIABOX__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageProvider;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[app]
env = "staging"

[server]
bind_addr = "127.0.0.1:9000"
ledger_path = "data/test-ledger"

[provider]
model = "stability-ai/sdxl:39ed52f2"
timeout_secs = 120
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.provider.model, "stability-ai/sdxl:39ed52f2");
        assert_eq!(config.provider.timeout_secs, 120);
        assert!(!config.app.env.is_production());
    }

    #[test]
    fn test_complex_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[app]
env = "production"

[server]
bind_addr = "0.0.0.0:8080"
ledger_path = "data/ledger"

[storage]
provider = "s3"
bucket = "media-generation"
endpoint = "http://minio:9000"
region = "us-east-1"
use_ssl = false

[queue]
workers = 8
cleanup_interval_secs = 1800

[retry]
max_retries = 5
backoff_base = 3
backoff_max_secs = 300

[retention]
job_ttl_days = 14

[cors]
allowed_origins = ["https://app.example.com"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();

        assert!(config.app.env.is_production());
        assert_eq!(config.storage.provider, StorageProvider::S3);
        assert_eq!(config.storage.bucket, "media-generation");
        assert_eq!(config.storage.endpoint.as_deref(), Some("http://minio:9000"));
        assert!(!config.storage.use_ssl);
        assert_eq!(config.queue.workers, 8);
        assert_eq!(config.queue.cleanup_interval_secs, 1800);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base, 3);
        assert_eq!(config.retry.backoff_max_secs, 300);
        assert_eq!(config.retention.job_ttl_days, 14);
        assert_eq!(config.cors.allowed_origins, vec!["https://app.example.com"]);
    }
}
