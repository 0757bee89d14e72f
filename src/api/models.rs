//! API models for the MediaBox job and media endpoints.
//!
//! Request/response contract:
//! - `POST /jobs/generate` accepts a [`CreateJobRequest`] and returns a
//!   [`JobCreatedResponse`] with a polling URL
//! - `GET /jobs/status/{id}` and `GET /jobs` return [`JobStatusResponse`],
//!   embedding a [`MediaSummary`] once an artifact exists
//! - `GET /media/{id}/info` returns the full media record
//!
//! Example submission (as JSON):
//!
//! ```json
//! {
//!   "prompt": "A sunset over snow-capped mountains",
//!   "parameters": {"width": 512, "height": 512, "seed": 42},
//!   "webhook_url": "https://example.com/hooks/media",
//!   "metadata": {"request_source": "batch-7"}
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};
use crate::media::{MediaRecord, MediaType};

#[derive(Debug, Deserialize, Clone)]
pub struct CreateJobRequest {
    pub prompt: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobCreatedResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub status_url: String,
    /// Seconds until the job is expected to finish
    pub estimated_completion_time: u64,
}

/// Artifact summary embedded in job status responses
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaSummary {
    pub id: Uuid,
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub mime_type: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaSummary {
    pub fn from_record(record: &MediaRecord) -> Self {
        Self {
            id: record.id,
            url: record
                .storage_url
                .clone()
                .unwrap_or_else(|| format!("/media/{}", record.id)),
            media_type: record.media_type,
            mime_type: record.mime_type.clone(),
            file_size_bytes: record.file_size_bytes,
            width: record.width,
            height: record.height,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub status: JobStatus,
    /// Derived completion percentage
    pub progress: u8,
    pub prompt: String,
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub media: Option<Vec<MediaSummary>>,
}

impl JobStatusResponse {
    pub fn from_job(job: Job, media: Option<MediaSummary>) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: derive_progress(job.status),
            prompt: job.prompt,
            parameters: job.parameters,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration_seconds: match (job.started_at, job.completed_at) {
                (Some(s), Some(c)) => Some((c - s).num_milliseconds() as f64 / 1000.0),
                _ => None,
            },
            retry_count: job.retry_count,
            error_message: job.error_message,
            media: media.map(|m| vec![m]),
        }
    }
}

/// Progress is derived, not tracked: queued work reads 0, in-flight 50,
/// finished 100
pub fn derive_progress(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 0,
        JobStatus::Processing | JobStatus::Retrying => 50,
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 100,
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
