use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{JobUpdate, LedgerError, LedgerStore};
use crate::queue::TaskBroker;

use super::model::{Job, JobStatus};

/// Longest accepted prompt, in characters
pub const MAX_PROMPT_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("cannot modify job {0} in terminal state {1}")]
    InvalidState(Uuid, JobStatus),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for JobError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::JobNotFound(id) => JobError::NotFound(id),
            other => JobError::Ledger(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Fields of a submission request
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub prompt: String,
    pub parameters: Value,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_metadata: Option<Value>,
}

/// Enforces the job state machine on top of the ledger
///
/// Every transition carries a pre-state guard; a write whose guard fails
/// leaves the stored record untouched and reports `applied = false`. Terminal
/// statuses are therefore immutable no matter how callers race.
#[derive(Clone)]
pub struct JobService {
    ledger: Arc<LedgerStore>,
    broker: Arc<TaskBroker>,
    max_retries: u32,
}

impl JobService {
    pub fn new(ledger: Arc<LedgerStore>, broker: Arc<TaskBroker>, max_retries: u32) -> Self {
        Self {
            ledger,
            broker,
            max_retries,
        }
    }

    /// Validate and persist a new pending job
    pub fn create(&self, request: NewJob) -> Result<Job> {
        let prompt = validate_prompt(&request.prompt)?;

        if let Some(url) = request
            .request_metadata
            .as_ref()
            .and_then(|meta| meta.get("webhook_url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
        {
            validate_webhook_url(url)?;
        }

        let mut job = Job::new(prompt, request.parameters, self.max_retries);
        job.client_ip = request.client_ip;
        job.user_agent = request.user_agent;
        job.request_metadata = request.request_metadata;

        self.ledger.insert_job(&job)?;

        info!(
            job_id = %job.id,
            prompt_preview = %job.prompt.chars().take(50).collect::<String>(),
            "Job created"
        );
        Ok(job)
    }

    /// Get a job, erroring when the id is unknown
    pub fn get(&self, id: &Uuid) -> Result<Job> {
        self.ledger
            .get_job(id)?
            .ok_or(JobError::NotFound(*id))
    }

    /// Transition pending/retrying -> processing
    ///
    /// Sets `started_at` on the first transition only. A terminal job is
    /// returned unchanged; re-entering processing is idempotent so a
    /// redelivered task can resume a job stranded mid-flight.
    pub async fn mark_processing(&self, id: &Uuid) -> Result<JobUpdate> {
        let update = self
            .ledger
            .update_job(id, |job| {
                if job.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Processing;
                if job.started_at.is_none() {
                    job.started_at = Some(Utc::now());
                }
                true
            })
            .await?;

        if update.applied {
            info!(job_id = %id, "Job processing");
        }
        Ok(update)
    }

    /// Transition processing -> completed, linking the media record
    ///
    /// Rejected (record returned unchanged) when the pre-state is anything
    /// but processing - in particular when a cancellation won the race.
    pub async fn mark_completed(&self, id: &Uuid, media_id: Uuid) -> Result<JobUpdate> {
        let update = self
            .ledger
            .update_job(id, |job| {
                if job.status != JobStatus::Processing {
                    return false;
                }
                job.status = JobStatus::Completed;
                job.media_id = Some(media_id);
                job.completed_at = Some(Utc::now());
                true
            })
            .await?;

        if update.applied {
            info!(
                job_id = %id,
                media_id = %media_id,
                duration = ?update.job.duration_seconds(),
                "Job completed"
            );
        } else {
            warn!(
                job_id = %id,
                status = %update.job.status,
                "Completion rejected, job already terminal"
            );
        }
        Ok(update)
    }

    /// Transition any non-terminal state -> failed with error information
    pub async fn mark_failed(
        &self,
        id: &Uuid,
        error_message: &str,
        error_details: Option<Value>,
    ) -> Result<JobUpdate> {
        let message = error_message.to_string();
        let update = self
            .ledger
            .update_job(id, move |job| {
                if job.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Failed;
                job.error_message = Some(message);
                job.error_details = error_details;
                job.completed_at = Some(Utc::now());
                true
            })
            .await?;

        if update.applied {
            info!(job_id = %id, error = %error_message, "Job failed");
        }
        Ok(update)
    }

    /// Atomically increment the retry counter and enter retrying
    ///
    /// Guarded by retry eligibility, so `retry_count` can never exceed
    /// `max_retries`.
    pub async fn increment_retry(&self, id: &Uuid) -> Result<JobUpdate> {
        let update = self
            .ledger
            .update_job(id, |job| {
                if !job.can_retry() {
                    return false;
                }
                job.retry_count += 1;
                job.status = JobStatus::Retrying;
                job.completed_at = None;
                true
            })
            .await?;

        if update.applied {
            info!(
                job_id = %id,
                retry_count = update.job.retry_count,
                max_retries = update.job.max_retries,
                "Job retry scheduled"
            );
        }
        Ok(update)
    }

    /// True iff the job has failed and has retry budget left
    pub fn should_retry(&self, id: &Uuid) -> Result<bool> {
        Ok(self
            .ledger
            .get_job(id)?
            .is_some_and(|job| job.can_retry()))
    }

    /// Transition any non-terminal state -> cancelled and revoke the task
    ///
    /// The revoke is best-effort and never gates the state change. Errors
    /// with `InvalidState` when the job is already terminal.
    pub async fn cancel(&self, id: &Uuid) -> Result<Job> {
        let update = self
            .ledger
            .update_job(id, |job| {
                if job.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                true
            })
            .await?;

        if !update.applied {
            return Err(JobError::InvalidState(*id, update.job.status));
        }

        if let Some(task_id) = &update.job.provider_task_id {
            if !self.broker.revoke(task_id) {
                warn!(job_id = %id, task_id, "Task revocation failed");
            }
        }

        info!(job_id = %id, "Job cancelled");
        Ok(update.job)
    }

    /// Record the queue task id assigned at enqueue time
    pub async fn attach_task(&self, id: &Uuid, task_id: &str) -> Result<Job> {
        let task_id = task_id.to_string();
        let update = self
            .ledger
            .update_job(id, move |job| {
                job.provider_task_id = Some(task_id);
                true
            })
            .await?;
        Ok(update.job)
    }

    /// Paginated listing, newest first
    pub fn list(
        &self,
        status: Option<JobStatus>,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Job>, usize)> {
        let offset = page.saturating_sub(1) * per_page;
        Ok(self.ledger.list_jobs(status, offset, per_page)?)
    }

    /// Delete terminal jobs completed more than `days` ago
    pub fn cleanup_old(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let count = self.ledger.delete_terminal_before(cutoff)?;
        if count > 0 {
            info!(count, days, "Cleaned up old jobs");
        }
        Ok(count)
    }
}

fn validate_prompt(prompt: &str) -> Result<String> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(JobError::Validation("prompt must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_PROMPT_CHARS {
        return Err(JobError::Validation(format!(
            "prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_webhook_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(JobError::Validation(
            "webhook_url must use the http or https scheme".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;
    use serde_json::json;
    use tempfile::TempDir;

    fn service() -> (JobService, TempDir) {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(LedgerStore::open(temp.path().join("ledger")).unwrap());
        let queue = Arc::new(TaskQueue::open(temp.path().join("queue")).unwrap());
        let (broker, _gen, _maint) = TaskBroker::new(queue, 1, 10);
        (JobService::new(ledger, Arc::new(broker), 3), temp)
    }

    fn request(prompt: &str) -> NewJob {
        NewJob {
            prompt: prompt.to_string(),
            parameters: json!({}),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_trims_and_validates_prompt() {
        let (service, _temp) = service();

        let job = service.create(request("  a sunset  ")).unwrap();
        assert_eq!(job.prompt, "a sunset");
        assert_eq!(job.status, JobStatus::Pending);

        let err = service.create(request("   ")).unwrap_err();
        assert!(matches!(err, JobError::Validation(ref m) if m.contains("prompt")));

        let long = "x".repeat(1001);
        let err = service.create(request(&long)).unwrap_err();
        assert!(matches!(err, JobError::Validation(ref m) if m.contains("prompt")));
    }

    #[test]
    fn test_create_validates_webhook_scheme() {
        let (service, _temp) = service();

        let mut req = request("prompt");
        req.request_metadata = Some(json!({"webhook_url": "ftp://example.com"}));
        assert!(matches!(
            service.create(req),
            Err(JobError::Validation(_))
        ));

        let mut req = request("prompt");
        req.request_metadata = Some(json!({"webhook_url": "https://example.com/hook"}));
        assert!(service.create(req).is_ok());
    }

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        let update = service.mark_processing(&job.id).await.unwrap();
        assert!(update.applied);
        assert_eq!(update.job.status, JobStatus::Processing);
        let started_at = update.job.started_at.unwrap();

        let media_id = Uuid::now_v7();
        let update = service.mark_completed(&job.id, media_id).await.unwrap();
        assert!(update.applied);
        assert_eq!(update.job.status, JobStatus::Completed);
        assert_eq!(update.job.media_id, Some(media_id));
        assert!(update.job.completed_at.is_some());
        assert_eq!(update.job.started_at, Some(started_at));
    }

    #[tokio::test]
    async fn test_completed_only_from_processing() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        // Still pending: rejected, record unchanged
        let update = service.mark_completed(&job.id, Uuid::now_v7()).await.unwrap();
        assert!(!update.applied);
        assert_eq!(update.job.status, JobStatus::Pending);
        assert!(update.job.media_id.is_none());
    }

    #[tokio::test]
    async fn test_terminal_states_are_immutable() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        service.mark_processing(&job.id).await.unwrap();
        service.mark_failed(&job.id, "boom", None).await.unwrap();
        // Exhaust the retry budget so the job stays failed
        for _ in 0..3 {
            service.increment_retry(&job.id).await.unwrap();
            service.mark_processing(&job.id).await.unwrap();
            service.mark_failed(&job.id, "boom", None).await.unwrap();
        }

        let update = service.mark_processing(&job.id).await.unwrap();
        assert!(!update.applied);
        let update = service.mark_completed(&job.id, Uuid::now_v7()).await.unwrap();
        assert!(!update.applied);
        assert_eq!(update.job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_counter_never_exceeds_max() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        service.mark_processing(&job.id).await.unwrap();
        service.mark_failed(&job.id, "boom", None).await.unwrap();

        for expected in 1..=3u32 {
            assert!(service.should_retry(&job.id).unwrap());
            let update = service.increment_retry(&job.id).await.unwrap();
            assert!(update.applied);
            assert_eq!(update.job.retry_count, expected);
            assert_eq!(update.job.status, JobStatus::Retrying);
            // completed_at only set while terminal
            assert!(update.job.completed_at.is_none());

            service.mark_processing(&job.id).await.unwrap();
            service.mark_failed(&job.id, "boom", None).await.unwrap();
        }

        assert!(!service.should_retry(&job.id).unwrap());
        let update = service.increment_retry(&job.id).await.unwrap();
        assert!(!update.applied);
        assert_eq!(update.job.retry_count, 3);
    }

    #[tokio::test]
    async fn test_started_at_set_once() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        service.mark_processing(&job.id).await.unwrap();
        let first = service.get(&job.id).unwrap().started_at.unwrap();

        service.mark_failed(&job.id, "boom", None).await.unwrap();
        service.increment_retry(&job.id).await.unwrap();
        service.mark_processing(&job.id).await.unwrap();

        let second = service.get(&job.id).unwrap().started_at.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cancel_and_double_cancel() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        let cancelled = service.cancel(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        let err = service.cancel(&job.id).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidState(_, JobStatus::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let (service, _temp) = service();
        let err = service.cancel(&Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancellation_race_resolves_to_one_terminal_state() {
        let (service, _temp) = service();

        for _ in 0..20 {
            let job = service.create(request("prompt")).unwrap();
            service.mark_processing(&job.id).await.unwrap();

            let media_id = Uuid::now_v7();
            let cancel_service = service.clone();
            let complete_service = service.clone();
            let cancel_id = job.id;
            let complete_id = job.id;

            let (cancel_result, complete_result) = tokio::join!(
                tokio::spawn(async move { cancel_service.cancel(&cancel_id).await }),
                tokio::spawn(async move {
                    complete_service.mark_completed(&complete_id, media_id).await
                }),
            );
            let cancel_result = cancel_result.unwrap();
            let complete_result = complete_result.unwrap().unwrap();

            let final_job = service.get(&job.id).unwrap();
            match final_job.status {
                JobStatus::Completed => {
                    assert!(complete_result.applied);
                    assert!(cancel_result.is_err());
                }
                JobStatus::Cancelled => {
                    assert!(!complete_result.applied);
                    assert!(cancel_result.is_ok());
                }
                other => panic!("race produced non-terminal status {other}"),
            }
            assert_eq!(final_job.retry_count, 0);
            assert!(final_job.completed_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_attach_task() {
        let (service, _temp) = service();
        let job = service.create(request("prompt")).unwrap();

        let updated = service.attach_task(&job.id, "42").await.unwrap();
        assert_eq!(updated.provider_task_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_cleanup_old_removes_only_stale_terminal_jobs() {
        let (service, _temp) = service();

        let done = service.create(request("old")).unwrap();
        service.mark_processing(&done.id).await.unwrap();
        service
            .mark_completed(&done.id, Uuid::now_v7())
            .await
            .unwrap();

        // Recent completion survives a 30-day cleanup
        assert_eq!(service.cleanup_old(30).unwrap(), 0);
        // Zero-day cutoff removes it
        assert_eq!(service.cleanup_old(0).unwrap(), 1);
        assert!(matches!(
            service.get(&done.id),
            Err(JobError::NotFound(_))
        ));
    }
}
