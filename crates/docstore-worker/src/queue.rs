//! Durable job queue over a [`JobRepository`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use docstore_core::config::WorkerConfig;
use docstore_core::error::AppError;
use docstore_core::result::AppResult;
use docstore_core::types::id::{JobId, PrincipalId};
use docstore_database::repositories::JobRepository;
use docstore_entity::job::model::{Job, NewJob};
use docstore_entity::job::status::JobStatus;

/// How many attempts a job gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per job, including the first.
    pub max_attempts: i32,
    /// Delay before the second attempt. Doubles for each attempt after.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Build the policy from worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: i32) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(0).min(16);
        self.backoff_base.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Parameters for creating a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreateParams {
    /// Type of job (e.g., "document_ingest").
    pub job_type: String,
    /// Queue name (e.g., "ingest").
    pub queue: String,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Attempt budget; the queue's policy applies when absent.
    pub max_attempts: Option<i32>,
    /// Optional earliest run time.
    pub run_at: Option<DateTime<Utc>>,
    /// Principal who created the job.
    pub created_by: Option<PrincipalId>,
}

/// What the caller sees when polling a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job identifier.
    pub job_id: JobId,
    /// Current state.
    pub state: JobStatus,
    /// Progress percentage, 0 to 100.
    pub progress: i32,
    /// Result of a completed job.
    pub result: Option<serde_json::Value>,
    /// Why a dead-lettered job failed.
    pub failure_reason: Option<String>,
    /// Error from the most recent failed attempt, if any.
    pub last_error: Option<String>,
    /// Attempts started so far.
    pub attempts: i32,
    /// Attempt budget.
    pub max_attempts: i32,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
    /// When the job last changed.
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        let failure_reason = match job.status {
            JobStatus::Failed => job.error_message.clone(),
            _ => None,
        };
        Self {
            job_id: job.id,
            state: job.status,
            progress: job.progress,
            result: job.result,
            failure_reason,
            last_error: job.error_message,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Returned to `pending`, runnable again at the given time.
    Retrying(DateTime<Utc>),
    /// Moved to `failed`; no automatic retry.
    DeadLettered,
    /// The worker no longer held the job, so nothing was recorded.
    Superseded,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting to run.
    pub pending: i64,
    /// Jobs held by a worker.
    pub active: i64,
    /// Jobs finished successfully and not yet pruned.
    pub completed: i64,
    /// Dead-lettered jobs.
    pub failed: i64,
}

/// Job queue for enqueuing, claiming, and settling work.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Job repository for persistence.
    repo: Arc<dyn JobRepository>,
    /// Attempt budget and backoff.
    policy: RetryPolicy,
    /// Wakes idle workers when work arrives.
    wakeup: Arc<Notify>,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(repo: Arc<dyn JobRepository>, policy: RetryPolicy) -> Self {
        Self {
            repo,
            policy,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Retry policy applied to failures.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Handle idle workers wait on.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Persist a job and wake a worker. Never runs the job inline.
    pub async fn enqueue(&self, params: JobCreateParams) -> AppResult<Job> {
        let job = self
            .repo
            .insert(&NewJob {
                job_type: params.job_type,
                queue: params.queue,
                payload: params.payload,
                max_attempts: params.max_attempts.unwrap_or(self.policy.max_attempts),
                run_at: params.run_at,
                created_by: params.created_by,
            })
            .await?;

        self.wakeup.notify_one();
        debug!(job_id = %job.id, job_type = %job.job_type, queue = %job.queue, "Enqueued job");
        Ok(job)
    }

    /// Current status of a job. Reads only; never waits on the job.
    pub async fn status(&self, job_id: JobId) -> AppResult<JobStatusView> {
        self.repo
            .find_by_id(job_id)
            .await?
            .map(JobStatusView::from)
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }

    /// Claim the next runnable job from the first queue that has one.
    pub async fn dequeue(&self, queues: &[String], worker_id: &str) -> AppResult<Option<Job>> {
        for queue in queues {
            if let Some(job) = self.repo.claim_next(queue, worker_id).await? {
                debug!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    queue = %job.queue,
                    attempt = job.attempts,
                    "Dequeued job"
                );
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Record progress of a job this worker holds.
    ///
    /// Returns `false` once the job has been taken from the worker.
    pub async fn progress(&self, job: &Job, percent: i32) -> AppResult<bool> {
        let owned = self.repo.set_progress(job.id, owner(job), percent).await?;
        if !owned {
            debug!(job_id = %job.id, "Progress from a worker that no longer holds the job");
        }
        Ok(owned)
    }

    /// Show the job is still being worked on without changing its progress.
    pub async fn heartbeat(&self, job: &Job) -> AppResult<bool> {
        self.repo.heartbeat(job.id, owner(job)).await
    }

    /// Mark a job as completed with its result.
    ///
    /// Returns `false`, recording nothing, if the job was recovered and
    /// handed to another worker in the meantime.
    pub async fn complete(&self, job: &Job, result: &serde_json::Value) -> AppResult<bool> {
        if !self.repo.mark_completed(job.id, owner(job), result).await? {
            warn!(job_id = %job.id, "Ignoring completion from a worker that no longer holds the job");
            return Ok(false);
        }
        debug!(job_id = %job.id, "Job completed");
        Ok(true)
    }

    /// Settle a failed attempt of `job`.
    ///
    /// Retryable failures with attempts left go back to `pending` after the
    /// backoff delay; everything else is dead-lettered.
    pub async fn fail(&self, job: &Job, reason: &str, retryable: bool) -> AppResult<FailureOutcome> {
        if retryable && job.attempts < job.max_attempts {
            let delay = self.policy.backoff_for(job.attempts);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            if !self.repo.reschedule(job.id, owner(job), reason, run_at).await? {
                return Ok(superseded(job));
            }
            info!(
                job_id = %job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "Job attempt failed; retry scheduled"
            );
            return Ok(FailureOutcome::Retrying(run_at));
        }

        if !self.repo.mark_failed(job.id, owner(job), reason).await? {
            return Ok(superseded(job));
        }
        warn!(
            job_id = %job.id,
            attempts = job.attempts,
            reason,
            "Job dead-lettered"
        );
        Ok(FailureOutcome::DeadLettered)
    }

    /// Delete all but the `retain` most recently completed jobs.
    pub async fn prune_completed(&self, retain: i64) -> AppResult<u64> {
        let pruned = self.repo.prune_completed(retain).await?;
        if pruned > 0 {
            info!(pruned, retain, "Pruned completed jobs");
        }
        Ok(pruned)
    }

    /// Release active jobs with no progress or heartbeat for longer than `age`.
    pub async fn recover_stale(&self, age: Duration) -> AppResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        let recovered = self.repo.requeue_stale(cutoff).await?;
        if recovered > 0 {
            warn!(recovered, "Recovered jobs from vanished workers");
            self.wakeup.notify_one();
        }
        Ok(recovered)
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        let mut stats = QueueStats::default();
        for (status, count) in self.repo.count_by_status().await? {
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Active => stats.active = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}

fn owner(job: &Job) -> &str {
    job.worker_id.as_deref().unwrap_or_default()
}

fn superseded(job: &Job) -> FailureOutcome {
    warn!(job_id = %job.id, "Ignoring failure from a worker that no longer holds the job");
    FailureOutcome::Superseded
}
