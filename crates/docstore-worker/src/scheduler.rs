//! Cron scheduler for queue maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use docstore_core::config::WorkerConfig;
use docstore_core::error::AppError;

use crate::queue::JobQueue;

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Completed job records removed.
    pub pruned: u64,
    /// Jobs released because their worker stopped reporting.
    pub recovered: u64,
}

/// Prune old completed jobs and recover jobs abandoned by dead workers.
pub async fn run_maintenance(
    queue: &JobQueue,
    retain_completed: i64,
    stale_after: Duration,
) -> Result<MaintenanceReport, AppError> {
    let recovered = queue.recover_stale(stale_after).await?;
    let pruned = queue.prune_completed(retain_completed).await?;
    Ok(MaintenanceReport { pruned, recovered })
}

/// Cron-based scheduler for periodic queue maintenance
pub struct MaintenanceScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Queue being maintained
    queue: Arc<JobQueue>,
    /// Schedule and retention settings
    config: WorkerConfig,
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler")
            .field("cron", &self.config.maintenance_cron)
            .finish()
    }
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    pub async fn new(queue: Arc<JobQueue>, config: WorkerConfig) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            queue,
            config,
        })
    }

    /// Register the maintenance task on the configured schedule
    pub async fn register(&self) -> Result<(), AppError> {
        let queue = Arc::clone(&self.queue);
        let retain = self.config.retain_completed;
        let stale_after = Duration::from_secs(self.config.stale_after_seconds);

        let job = CronJob::new_async(self.config.maintenance_cron.as_str(), move |_uuid, _lock| {
            let queue = Arc::clone(&queue);
            Box::pin(async move {
                tracing::debug!("Running queue maintenance");
                match run_maintenance(&queue, retain, stale_after).await {
                    Ok(report) => tracing::debug!(
                        pruned = report.pruned,
                        recovered = report.recovered,
                        "Queue maintenance finished"
                    ),
                    Err(e) => tracing::error!("Queue maintenance failed: {}", e),
                }
            })
        })
        .map_err(|e| {
            AppError::configuration(format!(
                "Invalid maintenance schedule '{}': {}",
                self.config.maintenance_cron, e
            ))
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add maintenance schedule: {}", e))
        })?;

        tracing::info!("Registered: queue_maintenance ({})", self.config.maintenance_cron);
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> Result<(), AppError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
