use chrono::{DateTime, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Job lifecycle status.
///
/// Legal transitions:
/// `pending → assigned → processing → complete | failed | expired`, plus
/// `assigned/processing → pending` on startup recovery, `assigned/processing
/// → expired` via the reaper, and `terminal → pending` on admin retry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    Default,
    DeriveActiveEnum,
    EnumIter,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "job_status")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    #[default]
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Claimed by the dispatcher, sent (or being sent) to the worker
    #[sea_orm(string_value = "assigned")]
    Assigned,
    /// Worker has reported progress
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Finished; artifacts stored
    #[sea_orm(string_value = "complete")]
    Complete,
    /// Worker reported failure, or input was missing at dispatch
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Timed out while assigned/processing
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl JobStatus {
    /// Terminal states are never modified again except by admin retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Expired)
    }

    /// Counts toward the single-in-flight invariant.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Assigned | Self::Processing)
    }
}

/// Generation parameters passed verbatim to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationSettings {
    pub steps: u32,
    pub guidance: f64,
    pub octree_res: u32,
    pub seed: i64,
    pub height_mm: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            steps: 50,
            guidance: 5.0,
            octree_res: 384,
            seed: 42,
            height_mm: 100.0,
        }
    }
}

/// A submitted generation job. Central entity of the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub original_filename: String,
    /// Storage key of the validated input bytes
    pub input_path: String,
    /// SHA-256 of the input
    pub input_hash: String,
    /// Opaque client identity, used by admission only
    pub submitter: String,
    pub user_agent: Option<String>,
    /// Passed verbatim to the worker
    pub settings: serde_json::Value,
    pub current_step: Option<String>,
    pub progress_pct: i32,
    pub progress_message: Option<String>,
    pub stl_path: Option<String>,
    pub glb_path: Option<String>,
    pub vertex_count: Option<i64>,
    pub face_count: Option<i64>,
    pub is_watertight: Option<bool>,
    pub generation_time_s: Option<f64>,
    pub gpu_metrics: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Input for creating a job row.
///
/// The id is generated up front so the input file can be stored under a
/// per-job key before the row exists.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub original_filename: String,
    pub input_path: String,
    pub input_hash: String,
    pub submitter: String,
    pub user_agent: Option<String>,
    pub settings: serde_json::Value,
}

impl NewJob {
    pub fn new(
        original_filename: impl Into<String>,
        input_hash: impl Into<String>,
        submitter: impl Into<String>,
        user_agent: Option<String>,
        settings: &GenerationSettings,
        input_ext: &str,
    ) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            original_filename: original_filename.into(),
            input_path: format!("{}/input.{}", id, input_ext),
            input_hash: input_hash.into(),
            submitter: submitter.into(),
            user_agent,
            settings: serde_json::to_value(settings)
                .expect("generation settings serialize to JSON"),
        }
    }
}

/// Result payload of a finished job, as persisted on `complete`.
#[derive(Debug, Clone, Default)]
pub struct MeshOutput {
    pub stl_path: Option<String>,
    pub glb_path: Option<String>,
    pub vertex_count: i64,
    pub face_count: i64,
    pub is_watertight: bool,
    pub generation_time_s: f64,
    pub gpu_metrics: Option<serde_json::Value>,
}

/// A progress report from the worker.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub step: Option<String>,
    pub pct: i32,
    pub message: Option<String>,
}

/// Queue counts by status, for admission control and dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct QueueSummary {
    pub pending: u64,
    pub assigned: u64,
    pub processing: u64,
    pub complete: u64,
    pub failed: u64,
    pub expired: u64,
}

impl QueueSummary {
    pub fn from_counts(counts: &[(JobStatus, u64)]) -> Self {
        let mut summary = Self::default();
        for (status, count) in counts {
            match status {
                JobStatus::Pending => summary.pending = *count,
                JobStatus::Assigned => summary.assigned = *count,
                JobStatus::Processing => summary.processing = *count,
                JobStatus::Complete => summary.complete = *count,
                JobStatus::Failed => summary.failed = *count,
                JobStatus::Expired => summary.expired = *count,
            }
        }
        summary
    }
}

/// What admission hands back to the submitter.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdmissionTicket {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// 1-indexed position in the pending queue
    pub queue_position: u64,
    /// Uploads left in the submitter's 24h window
    pub remaining_quota: u64,
}
