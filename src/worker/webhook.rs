//! Webhook delivery
//!
//! One attempt per terminal transition, ten second budget, failures logged
//! and dropped. There is deliberately no second retry loop here competing
//! with the job retry policy.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::media::MediaRecord;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// POST a JSON payload, fire-and-forget
    pub async fn notify(&self, url: &str, payload: &Value) {
        let result = self.client.post(url).json(payload).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!(url, "Webhook delivered");
            }
            Ok(response) => {
                warn!(url, status = %response.status(), "Webhook rejected");
            }
            Err(e) => {
                warn!(url, error = %e, "Webhook delivery failed");
            }
        }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for a successfully completed job
pub fn success_payload(job_id: &Uuid, media: &MediaRecord) -> Value {
    let media_url = media
        .storage_url
        .clone()
        .unwrap_or_else(|| format!("/media/{}", media.id));

    json!({
        "job_id": job_id.to_string(),
        "status": "completed",
        "media_url": media_url,
        "media_id": media.id.to_string(),
    })
}

/// Payload for a permanently failed job
pub fn failure_payload(job_id: &Uuid, error: &str, error_details: Option<&Value>) -> Value {
    json!({
        "job_id": job_id.to_string(),
        "status": "failed",
        "error": error,
        "error_details": error_details,
    })
}
