use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};
use crate::media::MediaRecord;

use super::error::{LedgerError, Result};
use super::partitions::{encode_job_key, encode_media_key, encode_meta_key};

/// Outcome of a guarded job mutation
///
/// `applied` is false when the mutation's pre-state guard rejected the write;
/// `job` is then the untouched current record.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job: Job,
    pub applied: bool,
}

/// Fjall-backed persistent storage for jobs and media records
///
/// Job mutations go through [`LedgerStore::update_job`], which serializes
/// read-modify-write cycles behind an async mutex. Two writers racing on the
/// same job therefore resolve to exactly one winner; the loser observes the
/// committed state inside its closure and declines the write.
#[derive(Clone)]
pub struct LedgerStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    media: PartitionHandle,
    metadata: PartitionHandle,
    write_lock: std::sync::Arc<Mutex<()>>,
}

impl LedgerStore {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let media = keyspace.open_partition("media", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            media,
            metadata,
            write_lock: std::sync::Arc::new(Mutex::new(())),
        })
    }

    /// Persist a freshly created job
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let key = encode_job_key(&job.id);
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(key, value)?;
        debug!(job_id = %job.id, "Job inserted");
        Ok(())
    }

    /// Get a job by id
    pub fn get_job(&self, id: &Uuid) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Apply a guarded mutation to a single job
    ///
    /// The closure returns whether it mutated the record. Only applied
    /// mutations are persisted (with a refreshed `updated_at`); a declined
    /// mutation leaves the stored record byte-for-byte intact.
    pub async fn update_job<F>(&self, id: &Uuid, f: F) -> Result<JobUpdate>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let _guard = self.write_lock.lock().await;

        let mut job = self
            .get_job(id)?
            .ok_or(LedgerError::JobNotFound(*id))?;

        let applied = f(&mut job);
        if applied {
            job.updated_at = Utc::now();
            let value = serde_json::to_vec(&job)?;
            self.jobs.insert(encode_job_key(id), value)?;
        }

        Ok(JobUpdate { job, applied })
    }

    /// List jobs ordered by creation time descending
    ///
    /// Returns the requested page plus the total count of matching jobs.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Job>, usize)> {
        let mut jobs = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if status.is_none_or(|s| job.status == s) {
                jobs.push(job);
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = jobs.len();
        let page = jobs.into_iter().skip(offset).take(limit).collect();

        Ok((page, total))
    }

    /// Delete terminal jobs whose `completed_at` precedes the cutoff
    pub fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut expired = Vec::new();
        for item in self.jobs.iter() {
            let (key, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if job.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff) {
                expired.push(key);
            }
        }

        let count = expired.len();
        for key in expired {
            self.jobs.remove(key)?;
        }

        self.metadata.insert(
            encode_meta_key("last_cleanup"),
            Utc::now().to_rfc3339().as_bytes(),
        )?;

        if count > 0 {
            info!(count, "Removed expired jobs");
        }
        Ok(count)
    }

    /// Persist a media record
    pub fn insert_media(&self, record: &MediaRecord) -> Result<()> {
        let key = encode_media_key(&record.id);
        let value = serde_json::to_vec(record)?;
        self.media.insert(key, value)?;
        debug!(media_id = %record.id, "Media record inserted");
        Ok(())
    }

    /// Get a media record by id
    pub fn get_media(&self, id: &Uuid) -> Result<Option<MediaRecord>> {
        match self.media.get(encode_media_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete a media record; returns whether a record was removed
    pub fn delete_media(&self, id: &Uuid) -> Result<bool> {
        let key = encode_media_key(id);
        let existed = self.media.get(&key)?.is_some();
        if existed {
            self.media.remove(key)?;
        }
        Ok(existed)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key("last_cleanup"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageProvider;
    use crate::media::MediaType;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LedgerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path().join("ledger")).unwrap();
        (store, temp_dir)
    }

    fn test_media(id: Uuid) -> MediaRecord {
        MediaRecord {
            id,
            media_type: MediaType::Image,
            storage_path: format!("generated/{id}.png"),
            storage_url: None,
            file_size_bytes: Some(4),
            mime_type: Some("image/png".to_string()),
            file_extension: Some(".png".to_string()),
            width: None,
            height: None,
            duration_seconds: None,
            generation_model_name: None,
            generation_model_version: None,
            generation_params: None,
            storage_provider: StorageProvider::Local,
            bucket_name: None,
            etag: None,
            extra_metadata: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_insert_and_get_job() {
        let (store, _temp) = create_test_store();
        let job = Job::new("a sunset".to_string(), json!({}), 3);

        store.insert_job(&job).unwrap();
        let retrieved = store.get_job(&job.id).unwrap().unwrap();

        assert_eq!(retrieved.id, job.id);
        assert_eq!(retrieved.prompt, "a sunset");
        assert_eq!(retrieved.status, JobStatus::Pending);
    }

    #[test]
    fn test_get_nonexistent_job() {
        let (store, _temp) = create_test_store();
        assert!(store.get_job(&Uuid::now_v7()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_applies_and_persists() {
        let (store, _temp) = create_test_store();
        let job = Job::new("prompt".to_string(), json!({}), 3);
        store.insert_job(&job).unwrap();

        let update = store
            .update_job(&job.id, |j| {
                j.status = JobStatus::Processing;
                true
            })
            .await
            .unwrap();

        assert!(update.applied);
        assert_eq!(update.job.status, JobStatus::Processing);

        let reread = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(reread.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_declined_update_leaves_record_untouched() {
        let (store, _temp) = create_test_store();
        let job = Job::new("prompt".to_string(), json!({}), 3);
        store.insert_job(&job).unwrap();

        let update = store.update_job(&job.id, |_| false).await.unwrap();
        assert!(!update.applied);

        let reread = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(reread.updated_at, job.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let (store, _temp) = create_test_store();
        let result = store.update_job(&Uuid::now_v7(), |_| true).await;
        assert!(matches!(result, Err(LedgerError::JobNotFound(_))));
    }

    #[test]
    fn test_list_jobs_filter_and_order() {
        let (store, _temp) = create_test_store();

        let mut first = Job::new("first".to_string(), json!({}), 3);
        first.created_at = Utc::now() - Duration::minutes(2);
        let mut second = Job::new("second".to_string(), json!({}), 3);
        second.created_at = Utc::now() - Duration::minutes(1);
        let mut failed = Job::new("third".to_string(), json!({}), 3);
        failed.status = JobStatus::Failed;

        store.insert_job(&first).unwrap();
        store.insert_job(&second).unwrap();
        store.insert_job(&failed).unwrap();

        let (all, total) = store.list_jobs(None, 0, 10).unwrap();
        assert_eq!(total, 3);
        assert_eq!(all[0].prompt, "third");
        assert_eq!(all[2].prompt, "first");

        let (pending, total) = store.list_jobs(Some(JobStatus::Pending), 0, 10).unwrap();
        assert_eq!(total, 2);
        assert!(pending.iter().all(|j| j.status == JobStatus::Pending));

        let (page, total) = store.list_jobs(None, 1, 1).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].prompt, "second");
    }

    #[test]
    fn test_delete_terminal_before() {
        let (store, _temp) = create_test_store();

        let mut old_done = Job::new("old".to_string(), json!({}), 3);
        old_done.status = JobStatus::Completed;
        old_done.completed_at = Some(Utc::now() - Duration::days(40));

        let mut fresh_done = Job::new("fresh".to_string(), json!({}), 3);
        fresh_done.status = JobStatus::Completed;
        fresh_done.completed_at = Some(Utc::now() - Duration::days(1));

        let pending = Job::new("pending".to_string(), json!({}), 3);

        store.insert_job(&old_done).unwrap();
        store.insert_job(&fresh_done).unwrap();
        store.insert_job(&pending).unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        let removed = store.delete_terminal_before(cutoff).unwrap();
        assert_eq!(removed, 1);

        assert!(store.get_job(&old_done.id).unwrap().is_none());
        assert!(store.get_job(&fresh_done.id).unwrap().is_some());
        assert!(store.get_job(&pending.id).unwrap().is_some());
    }

    #[test]
    fn test_media_roundtrip_and_delete() {
        let (store, _temp) = create_test_store();
        let media = test_media(Uuid::now_v7());

        store.insert_media(&media).unwrap();
        let retrieved = store.get_media(&media.id).unwrap().unwrap();
        assert_eq!(retrieved.storage_path, media.storage_path);

        assert!(store.delete_media(&media.id).unwrap());
        assert!(!store.delete_media(&media.id).unwrap());
        assert!(store.get_media(&media.id).unwrap().is_none());
    }

    #[test]
    fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        let job = Job::new("durable".to_string(), json!({}), 3);

        {
            let store = LedgerStore::open(&path).unwrap();
            store.insert_job(&job).unwrap();
            store.persist().unwrap();
        }

        let store = LedgerStore::open(&path).unwrap();
        let reread = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(reread.prompt, "durable");
    }
}
