//! Ingestion worker configuration.

use serde::{Deserialize, Serialize};

/// Background worker and retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether this process runs ingestion workers.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum number of jobs executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Poll interval in milliseconds when no wake-up arrives.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Attempts per job before it is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Backoff before the second attempt; doubled for every further attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Number of completed job records kept by maintenance.
    #[serde(default = "default_retain_completed")]
    pub retain_completed: i64,
    /// How often a running job's heartbeat is refreshed.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Active jobs without progress or heartbeat for this long are assumed
    /// orphaned and requeued. Keep well above the heartbeat interval.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    /// Cron expression (with seconds) for the maintenance task.
    #[serde(default = "default_maintenance_cron")]
    pub maintenance_cron: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            retain_completed: default_retain_completed(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            stale_after_seconds: default_stale_after(),
            maintenance_cron: default_maintenance_cron(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    3
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_attempts() -> i32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_retain_completed() -> i64 {
    100
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_stale_after() -> u64 {
    900
}

fn default_maintenance_cron() -> String {
    "0 */5 * * * *".to_string()
}
