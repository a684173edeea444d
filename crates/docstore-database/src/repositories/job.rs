//! Job queue persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use docstore_core::error::{AppError, ErrorKind};
use docstore_core::result::AppResult;
use docstore_core::types::id::JobId;
use docstore_entity::job::model::{Job, NewJob};
use docstore_entity::job::status::JobStatus;

/// Reason recorded on jobs recovered from a vanished worker.
pub const STALE_JOB_REASON: &str = "Worker stopped before finishing the job";

/// Row filter for writes made by the worker holding a job: `$1` is the
/// job id and `$2` the worker id.
const OWNED_BY: &str = "id = $1 AND status = 'active' AND worker_id = $2";

/// Durable storage for the job queue.
#[async_trait]
pub trait JobRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Persist a new pending job.
    async fn insert(&self, job: &NewJob) -> AppResult<Job>;

    /// Find a job by ID.
    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>>;

    /// Claim the oldest runnable pending job on `queue`.
    ///
    /// The claimed job is `active`, owned by `worker_id`, and has its
    /// attempt counter incremented.
    async fn claim_next(&self, queue: &str, worker_id: &str) -> AppResult<Option<Job>>;

    /// Record progress (0 to 100) of a job `worker_id` still owns.
    ///
    /// Like every write below that names a worker, this only touches the
    /// row while it is `active` and held by `worker_id`, and returns
    /// whether it did.
    async fn set_progress(&self, id: JobId, worker_id: &str, progress: i32) -> AppResult<bool>;

    /// Refresh `updated_at` so the job is not mistaken for abandoned.
    async fn heartbeat(&self, id: JobId, worker_id: &str) -> AppResult<bool>;

    /// Mark a job completed with its result.
    async fn mark_completed(
        &self,
        id: JobId,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> AppResult<bool>;

    /// Return a job to `pending`, runnable again at `run_at`.
    async fn reschedule(
        &self,
        id: JobId,
        worker_id: &str,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Dead-letter a job.
    async fn mark_failed(&self, id: JobId, worker_id: &str, error: &str) -> AppResult<bool>;

    /// Delete all but the `keep` most recently completed jobs.
    async fn prune_completed(&self, keep: i64) -> AppResult<u64>;

    /// Release active jobs not updated since `older_than`.
    ///
    /// Jobs with attempts left go back to `pending`; the rest are
    /// dead-lettered.
    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> AppResult<u64>;

    /// Number of jobs per status.
    async fn count_by_status(&self) -> AppResult<Vec<(JobStatus, i64)>>;
}

/// PostgreSQL job repository.
#[derive(Debug, Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &NewJob) -> AppResult<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (job_type, queue, payload, max_attempts, run_at, created_by) \
             VALUES ($1, $2, $3, $4, COALESCE($5, NOW()), $6) RETURNING *",
        )
        .bind(&job.job_type)
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(job.max_attempts)
        .bind(job.run_at)
        .bind(job.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create job", e))
    }

    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    async fn claim_next(&self, queue: &str, worker_id: &str) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = 'active', started_at = NOW(), worker_id = $2, \
             attempts = attempts + 1, progress = 0, updated_at = NOW() \
             WHERE id = ( \
                SELECT id FROM jobs \
                WHERE queue = $1 AND status = 'pending' AND run_at <= NOW() \
                ORDER BY run_at ASC, created_at ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
             ) RETURNING *",
        )
        .bind(queue)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim job", e))
    }

    async fn set_progress(&self, id: JobId, worker_id: &str, progress: i32) -> AppResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE jobs SET progress = $3, updated_at = NOW() WHERE {OWNED_BY}"
        ))
        .bind(id)
        .bind(worker_id)
        .bind(progress.clamp(0, 100))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to update job progress", e)
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(&self, id: JobId, worker_id: &str) -> AppResult<bool> {
        let result = sqlx::query(&format!("UPDATE jobs SET updated_at = NOW() WHERE {OWNED_BY}"))
            .bind(id)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to record job heartbeat", e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: JobId,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(&format!(
            "UPDATE jobs SET status = 'completed', progress = 100, result = $3, \
             error_message = NULL, completed_at = NOW(), updated_at = NOW() WHERE {OWNED_BY}"
        ))
        .bind(id)
        .bind(worker_id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete job", e))?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: JobId,
        worker_id: &str,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE jobs SET status = 'pending', error_message = $3, run_at = $4, \
             worker_id = NULL, started_at = NULL, updated_at = NOW() WHERE {OWNED_BY}"
        ))
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to reschedule job", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: JobId, worker_id: &str, error: &str) -> AppResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE jobs SET status = 'failed', error_message = $3, completed_at = NOW(), \
             updated_at = NOW() WHERE {OWNED_BY}"
        ))
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to mark job as failed", e)
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune_completed(&self, keep: i64) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status = 'completed' AND id NOT IN ( \
                SELECT id FROM jobs WHERE status = 'completed' \
                ORDER BY completed_at DESC LIMIT $1 \
             )",
        )
        .bind(keep.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to prune jobs", e))?;
        Ok(result.rows_affected())
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET \
                status = CASE WHEN attempts >= max_attempts \
                    THEN 'failed'::job_status ELSE 'pending'::job_status END, \
                completed_at = CASE WHEN attempts >= max_attempts THEN NOW() ELSE NULL END, \
                error_message = $2, worker_id = NULL, started_at = NULL, \
                run_at = NOW(), updated_at = NOW() \
             WHERE status = 'active' AND updated_at < $1",
        )
        .bind(older_than)
        .bind(STALE_JOB_REASON)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to requeue jobs", e))?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> AppResult<Vec<(JobStatus, i64)>> {
        sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))
    }
}
