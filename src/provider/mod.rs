//! Synthesis provider client
//!
//! Abstracts the remote text-to-media service behind [`MediaSynthesizer`].
//! The concrete [`ProviderClient`] picks its mode at construction:
//!
//! - API token configured: real HTTP calls against the provider
//! - no token, non-production environment: deterministic local mock
//! - no token in production: every call fails with a configuration error

pub mod mock;
pub mod params;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppEnv, ProviderConfig};
use params::clean_parameters;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider failure: {0}")]
    Failure(String),

    #[error("provider API token is required in production")]
    ConfigMissing,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Split a model identifier `<owner>/<name>[:<version>]`
pub fn split_model(model: &str) -> (&str, Option<&str>) {
    match model.split_once(':') {
        Some((name, version)) => (name, Some(version)),
        None => (model, None),
    }
}

/// Seam between the worker and the remote synthesis service
#[async_trait]
pub trait MediaSynthesizer: Send + Sync {
    /// Submit a generation request and wait for its artifact URLs
    ///
    /// Returned URLs are either HTTP(S) or inline `data:` URLs. An empty
    /// result is an error.
    async fn generate(&self, prompt: &str, parameters: &Value) -> Result<Vec<String>>;

    /// Best-effort remote cancellation
    async fn cancel(&self, task_id: &str) -> bool;
}

enum Mode {
    Real { client: reqwest::Client, token: String },
    Mock { delay: Duration },
    Disabled,
}

/// Provider client selecting real, mock, or disabled mode at construction
pub struct ProviderClient {
    mode: Mode,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn from_config(config: &ProviderConfig, env: AppEnv) -> Self {
        let mode = match (&config.api_token, env) {
            (Some(token), _) => {
                info!(model = %config.model, "Provider client using real API");
                Mode::Real {
                    client: http_client(),
                    token: token.clone(),
                }
            }
            (None, env) if !env.is_production() => {
                warn!("No provider API token configured, using local mock");
                Mode::Mock {
                    delay: Duration::from_secs(5),
                }
            }
            (None, _) => Mode::Disabled,
        };

        Self {
            mode,
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Mock-mode client with an explicit latency, for tests
    pub fn mock(model: &str, delay: Duration) -> Self {
        Self {
            mode: Mode::Mock { delay },
            model: model.to_string(),
            endpoint: String::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_real(
        &self,
        client: &reqwest::Client,
        token: &str,
        prompt: &str,
        parameters: &Value,
    ) -> Result<Vec<String>> {
        let cleaned = clean_parameters(parameters, &self.model);

        let mut input = Map::new();
        input.insert("prompt".to_string(), Value::from(prompt));
        input.extend(cleaned);

        info!(
            model = %self.model,
            prompt_preview = %preview(prompt),
            "Submitting generation request"
        );

        // Versioned models go through the generic predictions endpoint
        let (name, version) = split_model(&self.model);
        let (url, body) = match version {
            Some(version) => (
                format!("{}/predictions", self.endpoint),
                serde_json::json!({"version": version, "input": input}),
            ),
            None => (
                format!("{}/models/{}/predictions", self.endpoint, name),
                serde_json::json!({"input": input}),
            ),
        };

        let response = client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Failure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Failure(format!(
                "prediction request returned {status}: {detail}"
            )));
        }

        let prediction: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Failure(e.to_string()))?;
        let id = prediction
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Failure("prediction response missing id".into()))?
            .to_string();

        self.poll_prediction(client, token, &id).await
    }

    async fn poll_prediction(
        &self,
        client: &reqwest::Client,
        token: &str,
        id: &str,
    ) -> Result<Vec<String>> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let url = format!("{}/predictions/{}", self.endpoint, id);

        loop {
            if tokio::time::Instant::now() >= deadline {
                // The prediction keeps billing unless cancelled
                let _ = self.cancel(id).await;
                return Err(ProviderError::Failure(format!(
                    "generation timed out after {}s",
                    self.timeout.as_secs()
                )));
            }

            let prediction: Value = client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| ProviderError::Failure(e.to_string()))?
                .json()
                .await
                .map_err(|e| ProviderError::Failure(e.to_string()))?;

            match prediction.get("status").and_then(Value::as_str) {
                Some("succeeded") => return extract_urls(prediction.get("output")),
                Some("failed") | Some("canceled") => {
                    let error = prediction
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("generation failed");
                    return Err(ProviderError::Failure(error.to_string()));
                }
                _ => tokio::time::sleep(Duration::from_secs(1)).await,
            }
        }
    }

    async fn generate_mock(
        &self,
        delay: Duration,
        prompt: &str,
        parameters: &Value,
    ) -> Result<Vec<String>> {
        info!(prompt_preview = %preview(prompt), "Mock generating media");

        // Simulate provider latency
        tokio::time::sleep(delay).await;

        let width = dimension(parameters, "width");
        let height = dimension(parameters, "height");

        Ok(vec![mock::png_data_url(width, height)])
    }
}

#[async_trait]
impl MediaSynthesizer for ProviderClient {
    async fn generate(&self, prompt: &str, parameters: &Value) -> Result<Vec<String>> {
        let urls = match &self.mode {
            Mode::Real { client, token } => {
                self.generate_real(client, token, prompt, parameters).await?
            }
            Mode::Mock { delay } => self.generate_mock(*delay, prompt, parameters).await?,
            Mode::Disabled => return Err(ProviderError::ConfigMissing),
        };

        if urls.is_empty() {
            return Err(ProviderError::Failure("no media generated".into()));
        }
        Ok(urls)
    }

    async fn cancel(&self, task_id: &str) -> bool {
        match &self.mode {
            Mode::Real { client, token } => {
                let url = format!("{}/predictions/{}/cancel", self.endpoint, task_id);
                match client.post(&url).bearer_auth(token).send().await {
                    Ok(response) if response.status().is_success() => {
                        info!(task_id, "Cancelled prediction");
                        true
                    }
                    Ok(response) => {
                        warn!(task_id, status = %response.status(), "Cancel rejected");
                        false
                    }
                    Err(e) => {
                        warn!(task_id, error = %e, "Failed to cancel prediction");
                        false
                    }
                }
            }
            Mode::Mock { .. } => true,
            Mode::Disabled => false,
        }
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

fn extract_urls(output: Option<&Value>) -> Result<Vec<String>> {
    match output {
        Some(Value::String(url)) => Ok(vec![url.clone()]),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()),
        _ => Err(ProviderError::Failure(format!(
            "unexpected output format: {output:?}"
        ))),
    }
}

fn dimension(parameters: &Value, key: &str) -> u32 {
    parameters
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(1024)
}

fn preview(prompt: &str) -> String {
    if prompt.len() > 50 {
        let cut = prompt
            .char_indices()
            .take_while(|(i, _)| *i < 50)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &prompt[..cut])
    } else {
        prompt.to_string()
    }
}
