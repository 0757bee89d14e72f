use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::config::StorageProvider;
use crate::jobs::{Job, NewJob};
use crate::storage::StorageError;

use super::error::ApiError;
use super::models::{
    CreateJobRequest, HealthResponse, JobCreatedResponse, JobListResponse, JobStatusResponse,
    ListJobsParams, MediaSummary,
};
use super::state::AppState;
use super::validation::{validate_pagination, DEFAULT_PER_PAGE};

/// Job submission endpoint (POST /jobs/generate)
///
/// Validates the request, persists a pending job, enqueues a generation task,
/// and records the queue task id on the job before responding. The task row
/// is durable before the 201 goes out, so an accepted job is never lost.
pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    let request_metadata = if body.webhook_url.is_some() || body.metadata.is_some() {
        Some(json!({
            "webhook_url": body.webhook_url,
            "custom_metadata": body.metadata,
        }))
    } else {
        None
    };

    let job = state.jobs.create(NewJob {
        prompt: body.prompt,
        parameters: body.parameters.unwrap_or_else(|| json!({})),
        client_ip,
        user_agent,
        request_metadata,
    })?;

    // Enqueue before responding; the caller's status URL must already have
    // backing work behind it
    let task_id = state
        .broker
        .enqueue_generation(&job.id)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to enqueue task: {e}")))?;
    let job = state.jobs.attach_task(&job.id, &task_id.to_string()).await?;

    state.metrics.task_published();
    state.metrics.job_accepted();

    let response = JobCreatedResponse {
        id: job.id,
        status: job.status,
        created_at: job.created_at,
        status_url: format!("/jobs/status/{}", job.id),
        estimated_completion_time: state.config.provider.timeout_secs,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Job status endpoint (GET /jobs/status/{job_id})
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.get(&job_id)?;
    let response = job_response(&state, job)?;
    Ok(Json(response))
}

/// Paginated job listing (GET /jobs)
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = params.page.unwrap_or(1);
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
    validate_pagination(page, per_page)?;

    let (jobs, total) = state.jobs.list(params.status, page, per_page)?;

    let jobs = jobs
        .into_iter()
        .map(|job| job_response(&state, job))
        .collect::<Result<Vec<_>, _>>()?;

    let total_pages = total.div_ceil(per_page);
    let response = JobListResponse {
        jobs,
        total,
        page,
        per_page,
        has_next: page < total_pages,
        has_prev: page > 1,
    };

    Ok(Json(response))
}

/// Cancellation endpoint (DELETE /jobs/{job_id})
///
/// 204 on success, 400 when the job is already terminal, 404 when unknown.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.jobs.cancel(&job_id).await?;
    state.metrics.job_cancelled();
    Ok(StatusCode::NO_CONTENT)
}

/// Media metadata endpoint (GET /media/{media_id}/info)
pub async fn media_info(
    State(state): State<AppState>,
    Path(media_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let media = state
        .ledger
        .get_media(&media_id)?
        .ok_or_else(|| ApiError::NotFound(format!("media {media_id}")))?;
    Ok(Json(media))
}

/// Media download endpoint (GET /media/{media_id})
///
/// Publicly reachable S3 objects get a 302; everything else is streamed
/// through the API with inline disposition and an hour of cacheability.
/// Expired media answers 410.
pub async fn download_media(
    State(state): State<AppState>,
    Path(media_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let media = state
        .ledger
        .get_media(&media_id)?
        .ok_or_else(|| ApiError::NotFound(format!("media {media_id}")))?;

    if media.is_expired() {
        return Err(ApiError::Gone(format!("media {media_id} has expired")));
    }

    if media.storage_provider == StorageProvider::S3 {
        if let Some(url) = &media.storage_url {
            return Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, url)
                .body(Body::empty())
                .map_err(|e| ApiError::Internal(e.to_string()));
        }
    }

    let (stream, content_length) =
        state
            .storage
            .download(&media.storage_path)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(path) => {
                    ApiError::NotFound(format!("media file {path} not found in storage"))
                }
                other => ApiError::Internal(other.to_string()),
            })?;

    let content_type = media
        .mime_type
        .clone()
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
    let filename = format!(
        "{}{}",
        media.id,
        media.file_extension.as_deref().unwrap_or("")
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{filename}\""),
        )
        .header(header::CACHE_CONTROL, "public, max-age=3600");

    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Media deletion endpoint (DELETE /media/{media_id})
///
/// Removes the backend object first, then the record. A backend failure
/// surfaces as 500 and leaves the record in place for a later retry.
pub async fn delete_media(
    State(state): State<AppState>,
    Path(media_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let media = state
        .ledger
        .get_media(&media_id)?
        .ok_or_else(|| ApiError::NotFound(format!("media {media_id}")))?;

    state
        .storage
        .delete(&media.storage_path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to delete media object: {e}")))?;

    state.ledger.delete_media(&media_id)?;

    tracing::info!(media_id = %media_id, "Media deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint (GET /health)
///
/// Reports component status for the API, ledger, task broker, and storage.
/// Returns 503 when any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "ledger".to_string(),
        match state.ledger.health_check() {
            Ok(()) => "healthy".to_string(),
            Err(e) => format!("unhealthy: {e}"),
        },
    );
    components.insert(
        "task_broker".to_string(),
        if state.broker.health_check() {
            "healthy".to_string()
        } else {
            "unhealthy: worker channel closed".to_string()
        },
    );
    components.insert("storage".to_string(), "healthy".to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

/// Assemble a status response, embedding the artifact summary when linked
fn job_response(state: &AppState, job: Job) -> Result<JobStatusResponse, ApiError> {
    let media = match job.media_id {
        Some(media_id) => state
            .ledger
            .get_media(&media_id)?
            .as_ref()
            .map(MediaSummary::from_record),
        None => None,
    };
    Ok(JobStatusResponse::from_job(job, media))
}
