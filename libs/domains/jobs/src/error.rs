use axum::response::{IntoResponse, Response};
use axum_helpers::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Submitter is banned")]
    Banned,

    #[error("Upload limit reached. Try again in 24 hours.")]
    RateLimited,

    #[error("Queue is full. Please try again later.")]
    QueueFull,

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type JobResult<T> = Result<T, JobError>;

/// Convert JobError to AppError for standardized error responses
impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => AppError::NotFound(format!("Job {} not found", id)),
            JobError::Validation(msg) => AppError::BadRequest(msg),
            JobError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            JobError::Banned => AppError::Forbidden("IP banned".to_string()),
            JobError::RateLimited => AppError::TooManyRequests(err.to_string()),
            JobError::QueueFull => AppError::ServiceUnavailable(err.to_string()),
            JobError::Storage(storage::StorageError::NotFound(key)) => {
                AppError::NotFound(format!("File missing: {}", key))
            }
            JobError::Storage(e) => AppError::InternalServerError(format!("Storage error: {}", e)),
            JobError::Database(msg) => {
                AppError::InternalServerError(format!("Database error: {}", msg))
            }
            JobError::Internal(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

impl From<sea_orm::DbErr> for JobError {
    fn from(err: sea_orm::DbErr) -> Self {
        JobError::Database(err.to_string())
    }
}
