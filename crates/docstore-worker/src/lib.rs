//! Ingestion pipeline and background processing for DocStore.
//!
//! This crate provides:
//! - A durable job queue with retry, backoff, and dead-lettering
//! - The ingestion intake that validates uploads and enqueues them
//! - A bounded worker pool that claims and executes queued jobs
//! - The ingestion job handler that stores content and commits versions
//! - A cron scheduler for queue maintenance

pub mod executor;
pub mod intake;
pub mod jobs;
pub mod queue;
pub mod runner;
pub mod scheduler;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use intake::{IngestRequest, IngestionService};
pub use jobs::IngestJobHandler;
pub use queue::{FailureOutcome, JobCreateParams, JobQueue, JobStatusView, QueueStats, RetryPolicy};
pub use runner::WorkerRunner;
pub use scheduler::{MaintenanceReport, MaintenanceScheduler, run_maintenance};
