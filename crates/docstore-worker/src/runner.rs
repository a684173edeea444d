//! Worker runner: main loop that claims jobs and executes them on a
//! bounded pool.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time;
use tracing;

use docstore_core::config::WorkerConfig;
use docstore_entity::job::model::Job;

use crate::executor::JobExecutor;
use crate::queue::{FailureOutcome, JobQueue};

/// How long shutdown waits for in-flight jobs by default.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Main worker runner that polls queues and executes jobs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Job queue for claiming and settling
    queue: Arc<JobQueue>,
    /// Job executor for dispatching
    executor: Arc<JobExecutor>,
    /// Worker configuration
    config: WorkerConfig,
    /// Worker identifier recorded on claimed jobs
    worker_id: String,
    /// Queues to poll (in priority order)
    queues: Vec<String>,
    /// Upper bound on waiting for in-flight jobs at shutdown
    drain_timeout: Duration,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        config: WorkerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            worker_id,
            queues: vec![docstore_entity::job::payload::IngestPayload::QUEUE.to_string()],
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the queues to poll
    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// Set how long shutdown waits for in-flight jobs
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Start the worker runner; runs until the cancel signal is received
    ///
    /// At most `concurrency` jobs run at once. Idle slots wait for the
    /// queue's wakeup or the poll interval, whichever comes first.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            "Worker '{}' started with concurrency={}, poll_interval={}ms, queues={:?}",
            self.worker_id,
            concurrency,
            self.config.poll_interval_ms,
            self.queues
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let wakeup = self.queue.wakeup();

        loop {
            if *cancel.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            match self.queue.dequeue(&self.queues, &self.worker_id).await {
                Ok(Some(job)) => {
                    self.spawn(job, permit);
                    continue;
                }
                Ok(None) => {
                    drop(permit);
                    tracing::trace!("No jobs available in queues");
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!("Failed to dequeue job: {}", e);
                }
            }

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("Worker '{}' shutting down", self.worker_id);
                        break;
                    }
                }
                _ = wakeup.notified() => {}
                _ = time::sleep(poll_interval) => {}
            }
        }

        tracing::info!(
            "Worker '{}' waiting for in-flight jobs to complete...",
            self.worker_id
        );

        let max_permits = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if time::timeout(self.drain_timeout, semaphore.acquire_many(max_permits))
            .await
            .is_err()
        {
            tracing::warn!(
                "Worker '{}' stopped with jobs still running; they will be recovered as stale",
                self.worker_id
            );
        }

        tracing::info!("Worker '{}' shut down complete", self.worker_id);
    }

    fn spawn(&self, job: Job, permit: OwnedSemaphorePermit) {
        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        let heartbeat_every = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));

        tokio::spawn(async move {
            let _permit = permit;
            let job_id = job.id;

            let outcome = tokio::select! {
                outcome = executor.execute(&job) => outcome,
                never = keep_alive(&queue, &job, heartbeat_every) => match never {},
            };

            match outcome {
                Ok(result) => match queue.complete(&job, &result).await {
                    Ok(true) => tracing::info!("Job {} completed successfully", job_id),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to mark job {} as completed: {}", job_id, e)
                    }
                },
                Err(err) => {
                    let reason = err.to_string();
                    match queue.fail(&job, &reason, err.is_retryable()).await {
                        Ok(FailureOutcome::Retrying(run_at)) => {
                            tracing::warn!(
                                "Job {} failed (transient), retrying at {}: {}",
                                job_id,
                                run_at,
                                reason
                            );
                        }
                        Ok(FailureOutcome::DeadLettered) => {
                            tracing::error!("Job {} failed permanently: {}", job_id, reason);
                        }
                        Ok(FailureOutcome::Superseded) => {}
                        Err(e) => {
                            tracing::error!("Failed to record failure of job {}: {}", job_id, e);
                        }
                    }
                }
            }
        });
    }
}

/// Refresh the job's heartbeat until the surrounding `select!` drops this.
async fn keep_alive(queue: &JobQueue, job: &Job, every: Duration) -> Infallible {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match queue.heartbeat(job).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Job {} is no longer held by this worker", job.id),
            Err(e) => tracing::warn!("Failed to refresh heartbeat of job {}: {}", job.id, e),
        }
    }
}
