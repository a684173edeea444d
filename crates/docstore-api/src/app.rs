//! Application builder: wires repositories, storage, services, and the
//! worker into an Axum app.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use docstore_core::config::AppConfig;
use docstore_core::error::AppError;
use docstore_core::traits::storage::ObjectStore;
use docstore_database::repositories::RepositorySet;
use docstore_service::document::{DownloadService, VersionEngine};
use docstore_worker::executor::JobExecutor;
use docstore_worker::intake::IngestionService;
use docstore_worker::jobs::IngestJobHandler;
use docstore_worker::queue::{JobQueue, RetryPolicy};
use docstore_worker::runner::WorkerRunner;
use docstore_worker::scheduler::MaintenanceScheduler;

use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    build_router(state).layer(TraceLayer::new_for_http())
}

/// Everything one DocStore process runs, wired together.
#[derive(Debug, Clone)]
pub struct Components {
    /// State for the HTTP layer.
    pub state: AppState,
    /// The ingestion queue shared by intake and workers.
    pub queue: Arc<JobQueue>,
    /// Handlers for every job type.
    pub executor: Arc<JobExecutor>,
}

impl Components {
    /// Wire repositories and an object store into services.
    pub fn assemble(config: AppConfig, repos: RepositorySet, store: Arc<dyn ObjectStore>) -> Self {
        let config = Arc::new(config);

        let engine = Arc::new(VersionEngine::new(
            Arc::clone(&repos.documents),
            Arc::clone(&store),
        ));
        let downloads = Arc::new(DownloadService::new(
            Arc::clone(&repos.documents),
            Arc::clone(&store),
        ));
        let queue = Arc::new(JobQueue::new(
            Arc::clone(&repos.jobs),
            RetryPolicy::from_config(&config.worker),
        ));
        let intake = Arc::new(IngestionService::new(
            Arc::clone(&queue),
            Arc::clone(&repos.documents),
            Arc::clone(&repos.nodes),
            config.storage.max_upload_size_bytes,
        ));

        let mut executor = JobExecutor::new();
        executor.register(Arc::new(IngestJobHandler::new(
            (*engine).clone(),
            Arc::clone(&queue),
        )));

        Self {
            state: AppState {
                config,
                engine,
                downloads,
                intake,
            },
            queue,
            executor: Arc::new(executor),
        }
    }

    /// A worker runner over this process's queue.
    pub fn worker(&self, worker_id: String) -> WorkerRunner {
        WorkerRunner::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.executor),
            self.state.config.worker.clone(),
            worker_id,
        )
    }

    /// A started maintenance scheduler for this process's queue.
    pub async fn start_maintenance(&self) -> Result<MaintenanceScheduler, AppError> {
        let scheduler =
            MaintenanceScheduler::new(Arc::clone(&self.queue), self.state.config.worker.clone())
                .await?;
        scheduler.register().await?;
        scheduler.start().await?;
        Ok(scheduler)
    }
}
