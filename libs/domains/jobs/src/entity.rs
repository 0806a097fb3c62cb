use crate::models::JobStatus;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};

/// Sea-ORM Entity for the jobs table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub status: JobStatus,
    pub original_filename: String,
    pub input_path: String,
    pub input_hash: String,
    pub submitter: String,
    pub user_agent: Option<String>,
    pub settings: Json,
    pub current_step: Option<String>,
    pub progress_pct: i32,
    pub progress_message: Option<String>,
    pub stl_path: Option<String>,
    pub glb_path: Option<String>,
    pub vertex_count: Option<i64>,
    pub face_count: Option<i64>,
    pub is_watertight: Option<bool>,
    pub generation_time_s: Option<f64>,
    pub gpu_metrics: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub error_step: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub assigned_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

// Conversion from Sea-ORM Model to domain Job
impl From<Model> for crate::models::Job {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            status: model.status,
            original_filename: model.original_filename,
            input_path: model.input_path,
            input_hash: model.input_hash,
            submitter: model.submitter,
            user_agent: model.user_agent,
            settings: model.settings,
            current_step: model.current_step,
            progress_pct: model.progress_pct,
            progress_message: model.progress_message,
            stl_path: model.stl_path,
            glb_path: model.glb_path,
            vertex_count: model.vertex_count,
            face_count: model.face_count,
            is_watertight: model.is_watertight,
            generation_time_s: model.generation_time_s,
            gpu_metrics: model.gpu_metrics,
            error_message: model.error_message,
            error_step: model.error_step,
            created_at: model.created_at.into(),
            assigned_at: model.assigned_at.map(Into::into),
            completed_at: model.completed_at.map(Into::into),
        }
    }
}

// Conversion from domain NewJob to Sea-ORM ActiveModel
impl From<crate::models::NewJob> for ActiveModel {
    fn from(input: crate::models::NewJob) -> Self {
        ActiveModel {
            id: Set(input.id),
            status: Set(JobStatus::Pending),
            original_filename: Set(input.original_filename),
            input_path: Set(input.input_path),
            input_hash: Set(input.input_hash),
            submitter: Set(input.submitter),
            user_agent: Set(input.user_agent),
            settings: Set(input.settings),
            current_step: Set(None),
            progress_pct: Set(0),
            progress_message: Set(None),
            stl_path: Set(None),
            glb_path: Set(None),
            vertex_count: Set(None),
            face_count: Set(None),
            is_watertight: Set(None),
            generation_time_s: Set(None),
            gpu_metrics: Set(None),
            error_message: Set(None),
            error_step: Set(None),
            created_at: Set(chrono::Utc::now().into()),
            assigned_at: Set(None),
            completed_at: Set(None),
        }
    }
}
