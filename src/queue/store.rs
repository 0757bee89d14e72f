use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Task decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Task not found: seq={0}")]
    TaskNotFound(u64),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// JSON task body carried through the queue
///
/// `{"task": "generate_media", "args": ["<job-id>"]}` for generation work,
/// `{"task": "cleanup_old_jobs", "args": []}` for maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBody {
    pub task: String,
    pub args: Vec<String>,
}

impl TaskBody {
    pub fn generate_media(job_id: &Uuid) -> Self {
        Self {
            task: "generate_media".to_string(),
            args: vec![job_id.to_string()],
        }
    }

    pub fn cleanup_old_jobs() -> Self {
        Self {
            task: "cleanup_old_jobs".to_string(),
            args: Vec::new(),
        }
    }

    /// Job id carried in the first argument, when present and well-formed
    pub fn job_id(&self) -> Option<Uuid> {
        self.args.first().and_then(|arg| Uuid::parse_str(arg).ok())
    }
}

/// Named queues, segregated so maintenance cannot starve generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Generation,
    Maintenance,
}

/// TaskQueue persists task rows in Fjall partitions
///
/// Layout:
/// - `generation` partition: u64 (big-endian) -> TaskBody (JSON)
/// - `maintenance` partition: u64 (big-endian) -> TaskBody (JSON)
/// - `metadata` partition: "next_seq" -> u64 (atomic counter)
/// - `revoked` partition: u64 (big-endian) -> empty marker
///
/// A row is inserted before the task is handed to any worker and removed only
/// by [`TaskQueue::ack`] after the worker reaches a terminal outcome. Rows
/// still present at startup are redelivered, giving at-least-once delivery
/// across crashes.
pub struct TaskQueue {
    keyspace: Keyspace,
    generation: PartitionHandle,
    maintenance: PartitionHandle,
    metadata: PartitionHandle,
    revoked: PartitionHandle,
    seq_counter: AtomicU64,
}

impl TaskQueue {
    /// Open or create a task queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening task queue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let generation =
            keyspace.open_partition("generation", PartitionCreateOptions::default())?;
        let maintenance =
            keyspace.open_partition("maintenance", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let revoked = keyspace.open_partition("revoked", PartitionCreateOptions::default())?;

        // Load the current sequence counter from metadata
        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        Ok(Self {
            keyspace,
            generation,
            maintenance,
            metadata,
            revoked,
            seq_counter: AtomicU64::new(current_seq),
        })
    }

    fn partition(&self, queue: QueueName) -> &PartitionHandle {
        match queue {
            QueueName::Generation => &self.generation,
            QueueName::Maintenance => &self.maintenance,
        }
    }

    /// Persist a task and return its sequence number
    ///
    /// The counter is persisted after the row so a crash never reuses a seq.
    pub fn enqueue(&self, queue: QueueName, body: &TaskBody) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let value = serde_json::to_vec(body)?;
        self.partition(queue).insert(seq.to_be_bytes(), value)?;

        self.metadata
            .insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, task = %body.task, "Task enqueued");
        Ok(seq)
    }

    /// Retrieve a task by sequence number
    pub fn get(&self, queue: QueueName, seq: u64) -> Result<Option<TaskBody>> {
        match self.partition(queue).get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Acknowledge a task after its pipeline reached a terminal outcome
    ///
    /// Removes the row so it is never redelivered. Acking an already-acked
    /// seq is a no-op.
    pub fn ack(&self, queue: QueueName, seq: u64) -> Result<()> {
        let key = seq.to_be_bytes();
        self.partition(queue).remove(key)?;
        self.revoked.remove(key)?;
        debug!(seq, "Task acked");
        Ok(())
    }

    /// All unacked tasks, in sequence order
    ///
    /// Used at startup to redeliver work lost to a crash between dequeue and
    /// ack.
    pub fn pending(&self, queue: QueueName) -> Result<Vec<(u64, TaskBody)>> {
        let mut tasks = Vec::new();
        for item in self.partition(queue).iter() {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            tasks.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(tasks)
    }

    /// Mark a task revoked; dispatch and workers will skip it
    pub fn revoke(&self, seq: u64) -> Result<()> {
        self.revoked.insert(seq.to_be_bytes(), b"")?;
        info!(seq, "Task revoked");
        Ok(())
    }

    pub fn is_revoked(&self, seq: u64) -> Result<bool> {
        Ok(self.revoked.get(seq.to_be_bytes())?.is_some())
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the queue is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_enqueue_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp_dir.path()).unwrap();

        let job_id = Uuid::now_v7();
        let body = TaskBody::generate_media(&job_id);
        let seq = queue.enqueue(QueueName::Generation, &body).unwrap();

        assert_eq!(seq, 0);

        let retrieved = queue.get(QueueName::Generation, seq).unwrap().unwrap();
        assert_eq!(retrieved.task, "generate_media");
        assert_eq!(retrieved.job_id(), Some(job_id));
    }

    #[test]
    fn test_sequential_ids_span_queues() {
        let temp_dir = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp_dir.path()).unwrap();

        let seq1 = queue
            .enqueue(QueueName::Generation, &TaskBody::generate_media(&Uuid::now_v7()))
            .unwrap();
        let seq2 = queue
            .enqueue(QueueName::Maintenance, &TaskBody::cleanup_old_jobs())
            .unwrap();

        assert_eq!(seq1, 0);
        assert_eq!(seq2, 1);

        // Queues are segregated
        assert!(queue.get(QueueName::Generation, seq2).unwrap().is_none());
        assert!(queue.get(QueueName::Maintenance, seq2).unwrap().is_some());
    }

    #[test]
    fn test_ack_removes_task() {
        let temp_dir = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp_dir.path()).unwrap();

        let seq = queue
            .enqueue(QueueName::Generation, &TaskBody::generate_media(&Uuid::now_v7()))
            .unwrap();

        queue.ack(QueueName::Generation, seq).unwrap();
        assert!(queue.get(QueueName::Generation, seq).unwrap().is_none());

        // Double-ack is a no-op
        queue.ack(QueueName::Generation, seq).unwrap();
    }

    #[test]
    fn test_pending_lists_unacked() {
        let temp_dir = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp_dir.path()).unwrap();

        let seq1 = queue
            .enqueue(QueueName::Generation, &TaskBody::generate_media(&Uuid::now_v7()))
            .unwrap();
        let seq2 = queue
            .enqueue(QueueName::Generation, &TaskBody::generate_media(&Uuid::now_v7()))
            .unwrap();

        queue.ack(QueueName::Generation, seq1).unwrap();

        let pending = queue.pending(QueueName::Generation).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, seq2);
    }

    #[test]
    fn test_revoke_marker() {
        let temp_dir = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp_dir.path()).unwrap();

        let seq = queue
            .enqueue(QueueName::Generation, &TaskBody::generate_media(&Uuid::now_v7()))
            .unwrap();

        assert!(!queue.is_revoked(seq).unwrap());
        queue.revoke(seq).unwrap();
        assert!(queue.is_revoked(seq).unwrap());

        // Ack clears the marker along with the row
        queue.ack(QueueName::Generation, seq).unwrap();
        assert!(!queue.is_revoked(seq).unwrap());
    }

    #[test]
    fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let job_id = Uuid::now_v7();

        let seq = {
            let queue = TaskQueue::open(temp_dir.path()).unwrap();
            queue
                .enqueue(QueueName::Generation, &TaskBody::generate_media(&job_id))
                .unwrap()
        };

        let queue = TaskQueue::open(temp_dir.path()).unwrap();
        assert_eq!(queue.current_seq(), 1);

        let pending = queue.pending(QueueName::Generation).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, seq);
        assert_eq!(pending[0].1.job_id(), Some(job_id));
    }
}
