//! In-memory job repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use docstore_core::result::AppResult;
use docstore_core::types::id::JobId;
use docstore_entity::job::model::{Job, NewJob};
use docstore_entity::job::status::JobStatus;

use crate::repositories::JobRepository;
use crate::repositories::job::STALE_JOB_REASON;

/// Job repository held in process memory. Jobs do not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobRepository {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl MemoryJobRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Apply `update` to job `id` if it is active and held by `worker_id`.
async fn with_owned_job<F>(
    jobs: &Mutex<HashMap<JobId, Job>>,
    id: JobId,
    worker_id: &str,
    update: F,
) -> AppResult<bool>
where
    F: FnOnce(&mut Job),
{
    let mut jobs = jobs.lock().await;
    let Some(job) = jobs.get_mut(&id) else {
        return Ok(false);
    };
    if job.status != JobStatus::Active || job.worker_id.as_deref() != Some(worker_id) {
        return Ok(false);
    }
    update(job);
    job.updated_at = Utc::now();
    Ok(true)
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, job: &NewJob) -> AppResult<Job> {
        let now = Utc::now();
        let created = Job {
            id: JobId::new(),
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            payload: job.payload.clone(),
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error_message: None,
            attempts: 0,
            max_attempts: job.max_attempts,
            run_at: job.run_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            worker_id: None,
            created_by: job.created_by,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn claim_next(&self, queue: &str, worker_id: &str) -> AppResult<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();

        let next = jobs
            .values()
            .filter(|j| j.queue == queue && j.status == JobStatus::Pending && j.run_at <= now)
            .min_by_key(|j| (j.run_at, j.created_at))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.status = JobStatus::Active;
            job.started_at = Some(now);
            job.worker_id = Some(worker_id.to_string());
            job.attempts += 1;
            job.progress = 0;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn set_progress(&self, id: JobId, worker_id: &str, progress: i32) -> AppResult<bool> {
        with_owned_job(&self.jobs, id, worker_id, |job| {
            job.progress = progress.clamp(0, 100)
        })
        .await
    }

    async fn heartbeat(&self, id: JobId, worker_id: &str) -> AppResult<bool> {
        with_owned_job(&self.jobs, id, worker_id, |_| {}).await
    }

    async fn mark_completed(
        &self,
        id: JobId,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> AppResult<bool> {
        with_owned_job(&self.jobs, id, worker_id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = Some(result.clone());
            job.error_message = None;
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn reschedule(
        &self,
        id: JobId,
        worker_id: &str,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        with_owned_job(&self.jobs, id, worker_id, |job| {
            job.status = JobStatus::Pending;
            job.error_message = Some(error.to_string());
            job.run_at = run_at;
            job.worker_id = None;
            job.started_at = None;
        })
        .await
    }

    async fn mark_failed(&self, id: JobId, worker_id: &str, error: &str) -> AppResult<bool> {
        with_owned_job(&self.jobs, id, worker_id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn prune_completed(&self, keep: i64) -> AppResult<u64> {
        let mut jobs = self.jobs.lock().await;
        let mut completed: Vec<(Option<DateTime<Utc>>, JobId)> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .map(|j| (j.completed_at, j.id))
            .collect();
        completed.sort_by(|a, b| b.0.cmp(&a.0));

        let keep = usize::try_from(keep.max(0)).unwrap_or(usize::MAX);
        let mut removed = 0u64;
        for (_, id) in completed.into_iter().skip(keep) {
            jobs.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();
        let mut released = 0u64;

        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Active && job.updated_at < older_than;
            if !stale {
                continue;
            }
            if job.attempts >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
            } else {
                job.status = JobStatus::Pending;
                job.run_at = now;
            }
            job.error_message = Some(STALE_JOB_REASON.to_string());
            job.worker_id = None;
            job.started_at = None;
            job.updated_at = now;
            released += 1;
        }
        Ok(released)
    }

    async fn count_by_status(&self) -> AppResult<Vec<(JobStatus, i64)>> {
        let jobs = self.jobs.lock().await;
        let mut counts: HashMap<JobStatus, i64> = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
