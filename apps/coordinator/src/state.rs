use std::sync::Arc;

use domain_jobs::{AdmissionService, PgGatekeeper, PgJobRepository, QueueService};
use sea_orm::DatabaseConnection;
use storage::FsStorage;

use crate::bridge::WorkerBridge;
use crate::config::Config;

/// The bridge instantiated with production backends.
pub type Bridge = WorkerBridge<PgJobRepository, FsStorage>;

/// Shared application state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub queue: QueueService<PgJobRepository>,
    pub admission: Arc<AdmissionService<PgJobRepository, PgGatekeeper, FsStorage>>,
    pub storage: Arc<FsStorage>,
    pub bridge: Arc<Bridge>,
}
