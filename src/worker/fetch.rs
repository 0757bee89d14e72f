//! Artifact byte fetching
//!
//! Provider output is either an HTTP(S) URL or an inline base64 data URL.
//! HTTP failures are classified so the retry policy can tell transient
//! network trouble from a corrupt payload.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("malformed data URL: {0}")]
    DecodeFailed(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("download timed out: {0}")]
    DownloadTimeout(String),

    #[error("HTTP {0} fetching artifact")]
    HttpStatus(u16),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// HTTP client configuration for artifact downloads
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Downloads artifact bytes from provider URLs
#[derive(Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Fetch artifact bytes and their content type
    pub async fn fetch(&self, url: &str) -> Result<(Bytes, String)> {
        if url.starts_with("data:") {
            return decode_data_url(url);
        }

        debug!(url, "Downloading artifact");

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| mime::IMAGE_PNG.to_string());

        let bytes = response.bytes().await.map_err(classify)?;

        debug!(url, size = bytes.len(), content_type, "Artifact downloaded");
        Ok((bytes, content_type))
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::DownloadTimeout(err.to_string())
    } else {
        FetchError::NetworkUnreachable(err.to_string())
    }
}

/// Decode an inline `data:<mime>;base64,<payload>` URL
fn decode_data_url(url: &str) -> Result<(Bytes, String)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::DecodeFailed(truncate(url)))?;

    let (content_type, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| FetchError::DecodeFailed(truncate(url)))?;

    if content_type.is_empty() || payload.is_empty() {
        return Err(FetchError::DecodeFailed(truncate(url)));
    }

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| FetchError::DecodeFailed(e.to_string()))?;

    debug!(content_type, size = bytes.len(), "Data URL decoded");
    Ok((Bytes::from(bytes), content_type.to_string()))
}

fn truncate(url: &str) -> String {
    let cut = url
        .char_indices()
        .take_while(|(i, _)| *i < 50)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(url.len());
    format!("{}...", &url[..cut])
}
