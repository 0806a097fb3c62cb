use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::JobResult;
use crate::models::{Job, JobStatus, NewJob};

/// Partial update of a job row.
///
/// `None` leaves a column untouched; for nullable columns, `Some(None)`
/// clears it.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub current_step: Option<Option<String>>,
    pub progress_pct: Option<i32>,
    pub progress_message: Option<Option<String>>,
    pub stl_path: Option<Option<String>>,
    pub glb_path: Option<Option<String>>,
    pub vertex_count: Option<Option<i64>>,
    pub face_count: Option<Option<i64>>,
    pub is_watertight: Option<Option<bool>>,
    pub generation_time_s: Option<Option<f64>>,
    pub gpu_metrics: Option<Option<serde_json::Value>>,
    pub error_message: Option<Option<String>>,
    pub error_step: Option<Option<String>>,
    pub assigned_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

/// Repository trait for job persistence.
///
/// The queue state machine lives in `QueueService`; this trait is the data
/// access seam underneath it (PostgreSQL in production, a mock in tests).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new pending job.
    async fn insert(&self, input: NewJob) -> JobResult<Job>;

    /// Get a job by ID.
    async fn find_by_id(&self, id: Uuid) -> JobResult<Option<Job>>;

    /// Atomically claim the oldest pending job.
    ///
    /// Returns `None` when the queue is empty **or** another job is still
    /// assigned/processing (single-in-flight invariant). The selected row is
    /// flipped to `assigned` with `assigned_at` stamped, inside one
    /// transaction using `FOR UPDATE SKIP LOCKED`. FIFO by `created_at`,
    /// ties broken by `id`.
    async fn claim_next_pending(&self) -> JobResult<Option<Job>>;

    /// Apply a partial update and return the updated job.
    async fn update(&self, id: Uuid, patch: JobPatch) -> JobResult<Job>;

    /// Expire all assigned/processing jobs whose `assigned_at` is before the
    /// cutoff: status `expired`, error message "Job timed out",
    /// `completed_at` stamped. Returns the affected ids.
    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> JobResult<Vec<Uuid>>;

    /// Reset all assigned/processing jobs to pending, clearing assignment and
    /// progress. Returns how many rows were reset.
    async fn reset_orphaned(&self) -> JobResult<u64>;

    /// Count jobs with the given status.
    async fn count_by_status(&self, status: JobStatus) -> JobResult<u64>;

    /// Counts grouped by status.
    async fn status_counts(&self) -> JobResult<Vec<(JobStatus, u64)>>;

    /// Number of pending jobs queued before the given row (FIFO order).
    async fn pending_before(&self, created_at: DateTime<Utc>, id: Uuid) -> JobResult<u64>;

    /// Completed-job statistics: (total completed, average generation time).
    async fn completed_stats(&self) -> JobResult<(u64, Option<f64>)>;
}
