use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{QueueError, QueueName, TaskBody, TaskQueue};

/// TaskEnvelope wraps a task body with its sequence number
#[derive(Clone, Debug)]
pub struct TaskEnvelope {
    pub seq: u64,
    pub body: TaskBody,
}

/// TaskBroker distributes persisted tasks to the worker pool
///
/// Flow:
/// 1. API calls `broker.enqueue_generation(job_id)`
/// 2. Broker persists the task row (atomic, get seq)
/// 3. Broker sends TaskEnvelope{seq, body} to a worker via mpsc channel
/// 4. Round-robin distribution across the generation pool
/// 5. Bounded channels of capacity 1 per worker keep prefetch at one task,
///    so a long-running generation never queues work behind itself
///
/// Maintenance tasks travel over a separate channel consumed by a dedicated
/// worker so cleanup never starves generation.
///
/// The broker is NOT a separate task - it's just a struct with methods
/// called by API handlers and the scheduler.
pub struct TaskBroker {
    queue: Arc<TaskQueue>,
    generation_txs: Vec<mpsc::Sender<TaskEnvelope>>,
    maintenance_tx: mpsc::Sender<TaskEnvelope>,
    next_worker: AtomicUsize,
}

impl TaskBroker {
    /// Create a broker with one channel per generation worker plus one
    /// maintenance channel
    ///
    /// Returns the broker, the generation receivers (one per worker), and the
    /// maintenance receiver.
    pub fn new(
        queue: Arc<TaskQueue>,
        num_workers: usize,
        channel_capacity: usize,
    ) -> (
        Self,
        Vec<mpsc::Receiver<TaskEnvelope>>,
        mpsc::Receiver<TaskEnvelope>,
    ) {
        info!(num_workers, channel_capacity, "Creating task broker");

        let mut generation_txs = Vec::with_capacity(num_workers);
        let mut generation_rxs = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_capacity);
            generation_txs.push(tx);
            generation_rxs.push(rx);
            debug!(worker_id, "Created worker channel");
        }

        let (maintenance_tx, maintenance_rx) = mpsc::channel(channel_capacity);

        let broker = Self {
            queue,
            generation_txs,
            maintenance_tx,
            next_worker: AtomicUsize::new(0),
        };

        (broker, generation_rxs, maintenance_rx)
    }

    /// Persist and dispatch a generation task; returns its task id
    ///
    /// The row is durable before any worker sees the envelope, so the task id
    /// handed back to the API caller always refers to persisted work.
    pub async fn enqueue_generation(&self, job_id: &Uuid) -> Result<u64, QueueError> {
        let body = TaskBody::generate_media(job_id);
        let seq = self.queue.enqueue(QueueName::Generation, &body)?;
        self.dispatch_generation(TaskEnvelope { seq, body }).await;
        Ok(seq)
    }

    /// Persist a generation task now, deliver it after `delay`
    ///
    /// Used for retry backoff: the row is crash-safe immediately, visibility
    /// is deferred. The spawned delivery shares the broker via `Arc`.
    pub fn schedule_generation(
        self: &Arc<Self>,
        job_id: &Uuid,
        delay: Duration,
    ) -> Result<u64, QueueError> {
        let body = TaskBody::generate_media(job_id);
        let seq = self.queue.enqueue(QueueName::Generation, &body)?;

        let broker = Arc::clone(self);
        let envelope = TaskEnvelope { seq, body };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.dispatch_generation(envelope).await;
        });

        debug!(seq, delay_secs = delay.as_secs(), "Retry delivery scheduled");
        Ok(seq)
    }

    /// Persist and dispatch a maintenance task
    pub async fn enqueue_maintenance(&self, body: TaskBody) -> Result<u64, QueueError> {
        let seq = self.queue.enqueue(QueueName::Maintenance, &body)?;
        let envelope = TaskEnvelope { seq, body };
        if self.maintenance_tx.send(envelope).await.is_err() {
            warn!(seq, "Maintenance channel closed, task left for redelivery");
        }
        Ok(seq)
    }

    /// Redeliver every unacked task
    ///
    /// Called once at startup: work that was in flight when the process died
    /// is still in the queue partitions and gets dispatched again.
    pub async fn redeliver_pending(&self) -> Result<usize, QueueError> {
        let mut redelivered = 0;

        for (seq, body) in self.queue.pending(QueueName::Generation)? {
            if self.queue.is_revoked(seq)? {
                self.queue.ack(QueueName::Generation, seq)?;
                continue;
            }
            self.dispatch_generation(TaskEnvelope { seq, body }).await;
            redelivered += 1;
        }

        for (seq, body) in self.queue.pending(QueueName::Maintenance)? {
            let envelope = TaskEnvelope { seq, body };
            if self.maintenance_tx.send(envelope).await.is_err() {
                warn!(seq, "Maintenance channel closed during redelivery");
            }
            redelivered += 1;
        }

        if redelivered > 0 {
            info!(redelivered, "Redelivered unacked tasks");
        }
        Ok(redelivered)
    }

    /// Round-robin an envelope to the next generation worker
    async fn dispatch_generation(&self, envelope: TaskEnvelope) {
        let worker_idx =
            self.next_worker.fetch_add(1, Ordering::Relaxed) % self.generation_txs.len();
        let seq = envelope.seq;

        match self.generation_txs[worker_idx].send(envelope).await {
            Ok(()) => debug!(seq, worker_idx, "Task sent to worker"),
            Err(_) => {
                // Worker is gone; the persisted row is redelivered on restart
                warn!(seq, worker_idx, "Worker channel closed, task not delivered");
            }
        }
    }

    /// Best-effort revocation by task id
    ///
    /// May no-op if the task is already running; the terminal-state guards
    /// make the eventual `mark_completed` a no-op in that case.
    pub fn revoke(&self, task_id: &str) -> bool {
        let Ok(seq) = task_id.parse::<u64>() else {
            warn!(task_id, "Cannot revoke malformed task id");
            return false;
        };
        match self.queue.revoke(seq) {
            Ok(()) => true,
            Err(e) => {
                warn!(task_id, error = %e, "Failed to revoke task");
                false
            }
        }
    }

    pub fn is_revoked(&self, seq: u64) -> bool {
        self.queue.is_revoked(seq).unwrap_or(false)
    }

    /// Acknowledge a generation task after a terminal outcome
    pub fn ack_generation(&self, seq: u64) {
        if let Err(e) = self.queue.ack(QueueName::Generation, seq) {
            warn!(seq, error = %e, "Failed to ack generation task");
        }
    }

    /// Acknowledge a maintenance task
    pub fn ack_maintenance(&self, seq: u64) {
        if let Err(e) = self.queue.ack(QueueName::Maintenance, seq) {
            warn!(seq, error = %e, "Failed to ack maintenance task");
        }
    }

    /// Get number of generation workers
    pub fn num_workers(&self) -> usize {
        self.generation_txs.len()
    }

    /// Check if all worker channels are healthy (not closed)
    pub fn health_check(&self) -> bool {
        self.generation_txs.iter().all(|ch| !ch.is_closed())
            && !self.maintenance_tx.is_closed()
    }
}
