use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Job lifecycle status
///
/// Transitions form a DAG:
/// pending -> processing -> (completed | failed); failed -> retrying ->
/// processing; any non-terminal -> cancelled. Terminal states never
/// transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted generation request with lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub prompt: String,
    /// Generation parameters, opaque to the lifecycle engine
    #[serde(default)]
    pub parameters: Value,

    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,

    /// Task id assigned by the queue when the job was enqueued
    pub provider_task_id: Option<String>,
    /// Set only when the job completed successfully
    pub media_id: Option<Uuid>,

    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_metadata: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh pending job
    pub fn new(prompt: String, parameters: Value, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            status: JobStatus::Pending,
            prompt,
            parameters,
            retry_count: 0,
            max_retries,
            error_message: None,
            error_details: None,
            provider_task_id: None,
            media_id: None,
            client_ip: None,
            user_agent: None,
            request_metadata: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A job is retry-eligible only after it has actually failed
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Webhook URL carried in the request metadata, if any
    pub fn webhook_url(&self) -> Option<&str> {
        self.request_metadata
            .as_ref()
            .and_then(|meta| meta.get("webhook_url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("a sunset".to_string(), json!({}), 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(!job.is_terminal());
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_can_retry_requires_failed_status() {
        let mut job = Job::new("prompt".to_string(), json!({}), 3);
        assert!(!job.can_retry());

        job.status = JobStatus::Failed;
        assert!(job.can_retry());

        job.retry_count = 3;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_webhook_url_extraction() {
        let mut job = Job::new("prompt".to_string(), json!({}), 3);
        assert_eq!(job.webhook_url(), None);

        job.request_metadata = Some(json!({"webhook_url": "https://example.com/hook"}));
        assert_eq!(job.webhook_url(), Some("https://example.com/hook"));

        job.request_metadata = Some(json!({"webhook_url": ""}));
        assert_eq!(job.webhook_url(), None);
    }

    #[test]
    fn test_status_serde_shape() {
        let status: JobStatus = serde_json::from_str("\"retrying\"").unwrap();
        assert_eq!(status, JobStatus::Retrying);
        assert_eq!(serde_json::to_string(&JobStatus::Pending).unwrap(), "\"pending\"");
    }
}
