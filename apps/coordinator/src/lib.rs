//! Meshforge Coordinator Service
//!
//! The coordinator between image submitters and the single GPU worker.
//!
//! ## Architecture
//!
//! ```text
//! HTTP clients ──► Admission ──► jobs table (pending)
//!                                   │ claim (FIFO, single in-flight)
//! GPU worker ◄── WebSocket ◄── dispatch loop
//!      │ progress / terminal
//!      ▼
//! Worker Bridge ──► jobs table (persist first)
//!      │ fan-out
//!      ▼
//! listener WebSockets (per job)
//! ```
//!
//! Background tasks: the reaper (expires timed-out in-flight jobs) and the
//! per-session dispatch loop. On startup, orphaned in-flight jobs are reset
//! to pending before the listener binds.

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod openapi;
pub mod reaper;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testsupport;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use axum_helpers::health::health_router;
use axum_helpers::server::{create_production_app, with_common_layers};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::Environment;
use database::postgres::connect_from_config_with_retry;
use domain_jobs::{AdmissionLimits, AdmissionService, PgGatekeeper, PgJobRepository, QueueService};
use eyre::WrapErr;
use storage::FsStorage;
use tokio::sync::watch;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::state::AppState;

/// Run the coordinator until shutdown.
///
/// Startup order matters: migrations, then orphan recovery, then the
/// listener. A job that looked in-flight to a dead process must be pending
/// again before any worker can connect.
pub async fn run() -> eyre::Result<()> {
    // Install color-eyre first for readable startup errors
    install_color_eyre();

    let config = Config::from_env().wrap_err("Failed to load configuration")?;
    init_tracing(&config.environment);
    observability::init_metrics();

    let app_info = core_config::app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting meshforge coordinator");
    if config.environment == Environment::Development {
        info!("Running in development mode");
    }

    let storage = Arc::new(FsStorage::new(
        &config.storage.upload_dir,
        &config.storage.output_dir,
    ));
    storage
        .ensure_dirs()
        .await
        .wrap_err("Failed to create storage directories")?;

    info!("Connecting to PostgreSQL...");
    let db = connect_from_config_with_retry(config.database.clone(), None)
        .await
        .wrap_err("PostgreSQL connection failed")?;
    database::postgres::run_migrations::<migration::Migrator>(&db, app_info.name)
        .await
        .wrap_err("Migrations failed")?;

    let queue = QueueService::new(PgJobRepository::new(db.clone()));

    // Crash recovery: no worker session survived us; re-queue in-flight work
    queue
        .recover_orphaned()
        .await
        .wrap_err("Startup recovery failed")?;

    let gatekeeper = Arc::new(PgGatekeeper::new(
        db.clone(),
        config.queue.uploads_per_day,
        config.queue.quota_cache_ttl,
    ));
    let admission = Arc::new(AdmissionService::new(
        queue.clone(),
        gatekeeper,
        storage.clone(),
        AdmissionLimits {
            max_pending_jobs: config.queue.max_pending_jobs,
            max_upload_bytes: config.queue.max_upload_bytes,
        },
        config.defaults.clone(),
    ));

    let bridge = bridge::WorkerBridge::new(
        queue.clone(),
        storage.clone(),
        config.queue.dispatch_interval,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = reaper::spawn(
        queue.clone(),
        config.queue.reap_interval,
        config.queue.job_timeout,
        shutdown_rx,
    );

    let server_config = config.server.clone();
    let state = AppState {
        config: Arc::new(config),
        db: db.clone(),
        queue,
        admission,
        storage,
        bridge,
    };

    let app = Router::new()
        .merge(api::router(state.clone()))
        .merge(api::admin::router(state.clone()))
        .merge(ws::router(state.clone()))
        .merge(api::status_router(state.clone()))
        .merge(api::ready_router(state.clone()))
        .merge(health_router(app_info))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .route("/metrics", get(observability::metrics_handler));
    let app = with_common_layers(app);

    info!("Starting coordinator with graceful shutdown (30s timeout)");
    create_production_app(app, &server_config, Duration::from_secs(30), async move {
        info!("Shutting down: stopping reaper, closing database");
        let _ = shutdown_tx.send(true);
        let _ = reaper_handle.await;

        match db.close().await {
            Ok(_) => info!("PostgreSQL connection closed successfully"),
            Err(e) => tracing::error!("Error closing PostgreSQL: {}", e),
        }
    })
    .await
    .wrap_err("Server error")?;

    info!("Coordinator shutdown complete");
    Ok(())
}
