use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Development,
    Staging,
    Production,
}

impl AppEnv {
    pub fn is_production(&self) -> bool {
        matches!(self, AppEnv::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, AppEnv::Development)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub env: AppEnv,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Synthesis provider configuration
///
/// The API token is never read from TOML; it is loaded from the environment
/// by [`super::sources::load`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Model identifier, `<owner>/<name>[:<version>]`
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_provider_endpoint")]
    pub endpoint: String,
    /// Total time allowed for one generation call, in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_token: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            endpoint: default_provider_endpoint(),
            timeout_secs: default_provider_timeout(),
            api_token: None,
        }
    }
}

fn default_model() -> String {
    "black-forest-labs/flux-schnell".to_string()
}

fn default_provider_endpoint() -> String {
    "https://api.replicate.com/v1".to_string()
}

fn default_provider_timeout() -> u64 {
    300
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    #[default]
    Local,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    /// Root directory for the local backend
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            use_ssl: default_use_ssl(),
            local_root: default_local_root(),
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_bucket() -> String {
    "mediabox-media".to_string()
}

fn default_use_ssl() -> bool {
    true
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/media")
}

/// Task queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Number of generation workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds between `cleanup_old_jobs` maintenance runs
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_cleanup_interval() -> u64 {
    3600
}

/// Retry policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u32 {
    2
}

fn default_backoff_max() -> u64 {
    600
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_job_ttl_days")]
    pub job_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_days: default_job_ttl_days(),
        }
    }
}

fn default_job_ttl_days() -> u32 {
    30
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8000".to_string(),
    ]
}
