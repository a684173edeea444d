//! DocStore Server: versioned document storage engine.
//!
//! Main entry point that wires all crates together and starts the server.

use std::time::Duration;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use docstore_api::{Components, build_app};
use docstore_core::config::{AppConfig, DatabaseDriver};
use docstore_core::error::AppError;
use docstore_database::DatabasePool;
use docstore_database::memory::MemoryNodeDirectory;
use docstore_database::repositories::RepositorySet;
use docstore_storage::build_object_store;

#[tokio::main]
async fn main() {
    let env = std::env::var("DOCSTORE_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!("Loaded configuration (env: {})", env);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting DocStore v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Spool directory ──────────────────────────────────
    tokio::fs::create_dir_all(&config.storage.temp_dir)
        .await
        .map_err(|e| {
            AppError::configuration(format!(
                "Failed to create temp dir '{}': {}",
                config.storage.temp_dir, e
            ))
        })?;

    // ── Step 2: Object store ─────────────────────────────────────
    tracing::info!("Initializing {} object store...", config.storage.backend.as_str());
    let store = build_object_store(&config.storage).await?;

    // ── Step 3: Metadata store + migrations ──────────────────────
    let (repos, pool) = match config.database.driver {
        DatabaseDriver::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = DatabasePool::connect(&config.database).await?;
            tracing::info!("Running database migrations...");
            pool.migrate().await?;
            (pool.repositories(), Some(pool))
        }
        DatabaseDriver::Memory => {
            tracing::warn!("Using the in-memory metadata store; nothing survives a restart");
            (RepositorySet::memory(MemoryNodeDirectory::permissive()), None)
        }
    };

    // ── Step 4: Services, queue, worker ──────────────────────────
    let components = Components::assemble(config.clone(), repos, store);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);

    let worker_handle = if config.worker.enabled {
        let worker_id = format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let runner = components.worker(worker_id).with_drain_timeout(grace);
        let worker_cancel = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            runner.run(worker_cancel).await;
        }))
    } else {
        tracing::warn!("Worker disabled; accepted uploads stay pending");
        None
    };

    let scheduler = if config.worker.enabled {
        Some(components.start_maintenance().await?)
    } else {
        None
    };

    // ── Step 5: HTTP server ──────────────────────────────────────
    let app = build_app(components.state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("DocStore server listening on {}", addr);

    let server_tx = shutdown_tx.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = server_tx.send(true);
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)));

    // ── Step 6: Drain ────────────────────────────────────────────
    let _ = shutdown_tx.send(true);

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!("Scheduler shutdown failed: {}", e);
        }
    }

    if let Some(handle) = worker_handle {
        let deadline = grace + Duration::from_secs(1);
        if tokio::time::timeout(deadline, handle).await.is_err() {
            tracing::warn!("Worker did not stop within {:?}", deadline);
        }
    }

    if let Some(pool) = pool {
        pool.close().await;
    }

    tracing::info!("DocStore server stopped");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
