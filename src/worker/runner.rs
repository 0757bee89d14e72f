//! Task runner - executes the generation pipeline for one job

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{RetryConfig, StorageProvider};
use crate::jobs::{self, JobError, JobService};
use crate::ledger::{LedgerError, LedgerStore};
use crate::media::probe::probe_image;
use crate::media::{extension_for_mime, MediaRecord, MediaType};
use crate::observability::Metrics;
use crate::provider::{split_model, MediaSynthesizer, ProviderError};
use crate::storage::{StorageClient, StorageError};

use super::fetch::{ArtifactFetcher, FetchError};
use super::webhook::{failure_payload, success_payload, WebhookNotifier};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("provider timed out after {0}s")]
    SoftTimeout(u64),
}

impl TaskError {
    /// Whether the failure is worth another delivery attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Provider(ProviderError::Failure(_)) => true,
            TaskError::Provider(ProviderError::ConfigMissing) => false,
            TaskError::Fetch(FetchError::DecodeFailed(_)) => false,
            TaskError::Fetch(_) => true,
            TaskError::Storage(StorageError::NotFound(_)) => false,
            TaskError::Storage(_) => true,
            TaskError::Ledger(_) => true,
            TaskError::SoftTimeout(_) => true,
        }
    }

    /// Stable kind tag recorded in `error_details`
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Provider(ProviderError::Failure(_)) => "provider_failure",
            TaskError::Provider(ProviderError::ConfigMissing) => "config_missing",
            TaskError::Fetch(FetchError::DecodeFailed(_)) => "decode_failed",
            TaskError::Fetch(FetchError::NetworkUnreachable(_)) => "network_unreachable",
            TaskError::Fetch(FetchError::DownloadTimeout(_)) => "download_timeout",
            TaskError::Fetch(FetchError::HttpStatus(_)) => "http_status_error",
            TaskError::Storage(StorageError::NotFound(_)) => "not_found",
            TaskError::Storage(StorageError::Unavailable(_)) => "storage_unavailable",
            TaskError::Storage(StorageError::Io(_)) => "storage_io",
            TaskError::Ledger(_) => "repository_error",
            TaskError::SoftTimeout(_) => "provider_failure",
        }
    }
}

/// Terminal outcome of one delivery attempt
#[derive(Debug)]
pub enum TaskOutcome {
    /// Pipeline reached `mark_completed` (or lost the cancellation race)
    Completed,
    /// Job was already terminal, nothing to do
    Skipped,
    /// Permanent failure, job marked failed
    Failed,
    /// Transient failure, re-enqueue after the given delay
    Retry { delay: Duration },
}

/// Shared dependencies of the generation pipeline
pub struct RunnerContext {
    pub jobs: JobService,
    pub ledger: Arc<LedgerStore>,
    pub storage: StorageClient,
    pub provider: Arc<dyn MediaSynthesizer>,
    pub fetcher: ArtifactFetcher,
    pub webhooks: WebhookNotifier,
    pub model: String,
    pub provider_timeout: Duration,
    pub retry: RetryConfig,
    pub metrics: Arc<Metrics>,
}

/// Execute the full pipeline for one job
///
/// Errors returned here mean the attempt could not even record its own
/// failure; the caller leaves the task unacked so it is redelivered.
pub async fn process_task(ctx: &RunnerContext, job_id: &Uuid) -> jobs::Result<TaskOutcome> {
    let job = match ctx.jobs.get(job_id) {
        Ok(job) => job,
        Err(JobError::NotFound(_)) => {
            error!(job_id = %job_id, "Job missing for delivered task");
            return Ok(TaskOutcome::Failed);
        }
        Err(e) => return Err(e),
    };

    if job.is_terminal() {
        warn!(job_id = %job_id, status = %job.status, "Job already terminal, skipping");
        return Ok(TaskOutcome::Skipped);
    }

    let update = ctx.jobs.mark_processing(job_id).await?;
    if !update.applied {
        // Cancelled between dequeue and transition
        return Ok(TaskOutcome::Skipped);
    }
    let job = update.job;

    match run_pipeline(ctx, &job).await {
        Ok(media) => {
            let update = ctx.jobs.mark_completed(job_id, media.id).await?;
            if update.applied {
                ctx.metrics.job_completed();
                if let Some(url) = job.webhook_url() {
                    ctx.webhooks
                        .notify(url, &success_payload(job_id, &media))
                        .await;
                }
            } else {
                // Cancellation won the race; the uploaded artifact stays
                // unreferenced until the retention sweep reaps its job row
                warn!(
                    job_id = %job_id,
                    media_id = %media.id,
                    "Job terminal before completion, artifact orphaned"
                );
            }
            Ok(TaskOutcome::Completed)
        }
        Err(err) => handle_failure(ctx, &job, err).await,
    }
}

/// Steps 4-9: generate, fetch, probe, store, record
async fn run_pipeline(ctx: &RunnerContext, job: &crate::jobs::Job) -> Result<MediaRecord, TaskError> {
    info!(
        job_id = %job.id,
        prompt_preview = %job.prompt.chars().take(50).collect::<String>(),
        "Calling synthesis provider"
    );

    let urls = tokio::time::timeout(
        ctx.provider_timeout,
        ctx.provider.generate(&job.prompt, &job.parameters),
    )
    .await
    .map_err(|_| TaskError::SoftTimeout(ctx.provider_timeout.as_secs()))??;

    let media_url = urls
        .first()
        .ok_or_else(|| ProviderError::Failure("no media generated".into()))?;

    let url_preview: String = media_url.chars().take(50).collect();
    info!(job_id = %job.id, url_preview = %url_preview, "Fetching artifact");
    let (bytes, content_type) = ctx.fetcher.fetch(media_url).await?;

    // Best-effort: a probe miss never fails the job
    let image_info = probe_image(&bytes);
    if image_info.is_none() {
        warn!(job_id = %job.id, "Failed to extract image metadata");
    }

    let extension = extension_for_mime(&content_type);
    let storage_key = storage_key(&job.id, extension);

    info!(job_id = %job.id, key = %storage_key, "Uploading artifact");
    let stored = ctx
        .storage
        .upload(&storage_key, bytes, &content_type)
        .await?;

    let (model_name, model_version) = split_model(&ctx.model);
    let record = MediaRecord {
        id: Uuid::now_v7(),
        media_type: MediaType::Image,
        storage_path: stored.storage_path,
        storage_url: stored.public_url,
        file_size_bytes: Some(stored.size as u64),
        mime_type: Some(content_type),
        file_extension: Some(extension.to_string()),
        width: image_info.as_ref().map(|i| i.width),
        height: image_info.as_ref().map(|i| i.height),
        duration_seconds: None,
        generation_model_name: Some(model_name.to_string()),
        generation_model_version: model_version.map(String::from),
        generation_params: Some(job.parameters.clone()),
        storage_provider: ctx.storage.provider(),
        bucket_name: (ctx.storage.provider() == StorageProvider::S3)
            .then(|| ctx.storage.bucket.clone()),
        etag: stored.etag,
        extra_metadata: image_info.map(|i| json!({"format": i.format})),
        created_at: Utc::now(),
        expires_at: None,
    };

    ctx.ledger.insert_media(&record)?;
    Ok(record)
}

/// Mark the job failed, then decide between retry and permanent failure
async fn handle_failure(
    ctx: &RunnerContext,
    job: &crate::jobs::Job,
    err: TaskError,
) -> jobs::Result<TaskOutcome> {
    error!(job_id = %job.id, error = %err, kind = err.kind(), "Generation pipeline failed");

    let details = json!({
        "kind": err.kind(),
        "retry_count": job.retry_count,
        "max_retries": job.max_retries,
    });

    let failed = ctx
        .jobs
        .mark_failed(&job.id, &err.to_string(), Some(details.clone()))
        .await?;
    if !failed.applied {
        // Cancelled mid-flight; nothing further to record
        return Ok(TaskOutcome::Skipped);
    }

    if err.is_retryable() && ctx.jobs.should_retry(&job.id)? {
        let update = ctx.jobs.increment_retry(&job.id).await?;
        if update.applied {
            let delay = backoff_delay(&ctx.retry, update.job.retry_count);
            ctx.metrics.retry_scheduled();
            return Ok(TaskOutcome::Retry { delay });
        }
    }

    ctx.metrics.job_failed();
    if let Some(url) = job.webhook_url() {
        ctx.webhooks
            .notify(
                url,
                &failure_payload(&job.id, &err.to_string(), Some(&details)),
            )
            .await;
    }
    Ok(TaskOutcome::Failed)
}

/// Storage key for a generated artifact
pub fn storage_key(job_id: &Uuid, extension: &str) -> String {
    format!("generated/{job_id}{extension}")
}

/// Exponential backoff capped at the configured maximum
pub fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let secs = (retry.backoff_base as u64).saturating_pow(attempt);
    Duration::from_secs(secs.min(retry.backoff_max_secs))
}
