//! Worker pool: consumes queue tasks and drives the generation pipeline
//!
//! One tokio task per generation worker, each fed by its own bounded channel
//! (capacity 1, so a worker never holds more than one pending task). A
//! separate maintenance worker runs the retention sweep, and a scheduler
//! enqueues that sweep on a fixed interval. Acks happen only after a terminal
//! outcome; a worker that dies mid-task leaves the row unacked for
//! redelivery.

pub mod fetch;
pub mod runner;
pub mod webhook;

pub use fetch::{ArtifactFetcher, FetchConfig, FetchError};
pub use runner::{RunnerContext, TaskError, TaskOutcome};
pub use webhook::WebhookNotifier;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::jobs::JobService;
use crate::queue::{TaskBody, TaskBroker, TaskEnvelope};

/// Grace added on top of the provider timeout before a task is killed
const HARD_TIMEOUT_GRACE: Duration = Duration::from_secs(60);

/// Spawn the generation worker pool
pub fn spawn_generation_workers(
    ctx: Arc<RunnerContext>,
    broker: Arc<TaskBroker>,
    receivers: Vec<mpsc::Receiver<TaskEnvelope>>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, rx)| {
            let ctx = Arc::clone(&ctx);
            let broker = Arc::clone(&broker);
            tokio::spawn(generation_worker(worker_id, ctx, broker, rx))
        })
        .collect()
}

async fn generation_worker(
    worker_id: usize,
    ctx: Arc<RunnerContext>,
    broker: Arc<TaskBroker>,
    mut rx: mpsc::Receiver<TaskEnvelope>,
) {
    info!(worker_id, "Generation worker started");

    while let Some(envelope) = rx.recv().await {
        let seq = envelope.seq;

        if broker.is_revoked(seq) {
            info!(worker_id, seq, "Skipping revoked task");
            broker.ack_generation(seq);
            continue;
        }

        let Some(job_id) = envelope.body.job_id() else {
            warn!(worker_id, seq, "Dropping task with malformed job id");
            broker.ack_generation(seq);
            continue;
        };

        let hard_timeout = ctx.provider_timeout + HARD_TIMEOUT_GRACE;
        let outcome =
            match tokio::time::timeout(hard_timeout, runner::process_task(&ctx, &job_id)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    // Could not even record the failure; leave the task
                    // unacked so it is redelivered after restart
                    error!(worker_id, seq, job_id = %job_id, error = %e, "Task left unacked");
                    continue;
                }
                Err(_) => {
                    error!(worker_id, seq, job_id = %job_id, "Hard time limit exceeded");
                    let _ = ctx
                        .jobs
                        .mark_failed(
                            &job_id,
                            "task hard time limit exceeded",
                            Some(json!({"timeout_secs": hard_timeout.as_secs()})),
                        )
                        .await;
                    ctx.metrics.job_failed();
                    TaskOutcome::Failed
                }
            };

        match outcome {
            TaskOutcome::Retry { delay } => {
                broker.ack_generation(seq);
                if let Err(e) = broker.schedule_generation(&job_id, delay) {
                    error!(worker_id, job_id = %job_id, error = %e, "Failed to schedule retry");
                }
            }
            TaskOutcome::Completed | TaskOutcome::Skipped | TaskOutcome::Failed => {
                broker.ack_generation(seq);
            }
        }
    }

    info!(worker_id, "Generation worker stopped");
}

/// Spawn the maintenance worker consuming the segregated maintenance queue
pub fn spawn_maintenance_worker(
    jobs: JobService,
    broker: Arc<TaskBroker>,
    mut rx: mpsc::Receiver<TaskEnvelope>,
    retention_days: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Maintenance worker started");

        while let Some(envelope) = rx.recv().await {
            match envelope.body.task.as_str() {
                "cleanup_old_jobs" => match jobs.cleanup_old(retention_days) {
                    Ok(count) => info!(count, "Cleanup run finished"),
                    Err(e) => error!(error = %e, "Cleanup run failed"),
                },
                other => warn!(task = other, "Unknown maintenance task"),
            }
            broker.ack_maintenance(envelope.seq);
        }
    })
}

/// Enqueue the retention sweep on a fixed interval
pub fn spawn_cleanup_scheduler(broker: Arc<TaskBroker>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = broker.enqueue_maintenance(TaskBody::cleanup_old_jobs()).await {
                warn!(error = %e, "Failed to enqueue cleanup task");
            }
        }
    })
}
