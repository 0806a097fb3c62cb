//! Jobs Domain
//!
//! The coordinator's core: the durable job queue, its status machine, the
//! admission path, and the wire protocol spoken with the GPU worker and with
//! progress listeners.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐
//! │ AdmissionService│  │ QueueService │  ← business logic, transitions
//! └───────┬────────┘   └──────┬───────┘
//!         │                   │
//!     ┌───▼───────────────────▼───┐
//!     │       JobRepository       │  ← data access (trait + PostgreSQL)
//!     └───────────┬───────────────┘
//!                 │
//!     ┌───────────▼───────────────┐
//!     │     Models / Entity       │  ← entities, DTOs, enums
//!     └───────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_jobs::{PgJobRepository, QueueService};
//! use sea_orm::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("postgres://...").await?;
//! let queue = QueueService::new(PgJobRepository::new(db));
//! queue.recover_orphaned().await?;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod ban;
pub mod entity;
pub mod error;
pub mod gatekeeper;
pub mod models;
pub mod postgres;
pub mod protocol;
pub mod queue;
pub mod repository;
pub mod validator;

// Re-export commonly used types
pub use admission::{AdmissionLimits, AdmissionService, Submission};
pub use error::{JobError, JobResult};
pub use gatekeeper::{Gatekeeper, PgGatekeeper, QuotaDecision};
pub use models::{
    AdmissionTicket, GenerationSettings, Job, JobStatus, MeshOutput, NewJob, ProgressUpdate,
    QueueSummary,
};
pub use postgres::PgJobRepository;
pub use protocol::{
    CommandAction, GpuSnapshot, JobCompletePayload, ListenerEvent, ServerMessage, WorkerInfo,
    WorkerMessage,
};
pub use queue::QueueService;
pub use repository::{JobPatch, JobRepository};
pub use validator::{validate_image, ValidatedInput};
