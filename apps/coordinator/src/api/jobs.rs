//! Public job endpoints: submission, status, artifact downloads, queue view.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_helpers::audit::{extract_ip_from_headers, extract_ip_from_socket};
use chrono::{DateTime, Utc};
use domain_jobs::{AdmissionTicket, Job, JobError, JobStatus, QueueSummary, Submission};
use serde::Serialize;
use storage::Storage;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::AppState;

/// Public view of a job row.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub original_filename: String,
    #[schema(value_type = Object)]
    pub settings: serde_json::Value,
    pub current_step: Option<String>,
    pub progress_pct: i32,
    pub progress_message: Option<String>,
    pub created_at: DateTime<Utc>,

    /// 1-indexed FIFO position; only while pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,

    // Populated only when complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_watertight: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub gpu_metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stl_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glb_url: Option<String>,

    // Populated only when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_step: Option<String>,
}

impl JobResponse {
    fn from_job(job: &Job, queue_position: Option<u64>) -> Self {
        let mut response = Self {
            job_id: job.id,
            status: job.status,
            original_filename: job.original_filename.clone(),
            settings: job.settings.clone(),
            current_step: job.current_step.clone(),
            progress_pct: job.progress_pct,
            progress_message: job.progress_message.clone(),
            created_at: job.created_at,
            queue_position,
            vertex_count: None,
            face_count: None,
            is_watertight: None,
            generation_time_s: None,
            gpu_metrics: None,
            completed_at: None,
            stl_url: None,
            glb_url: None,
            error: None,
            error_step: None,
        };

        match job.status {
            JobStatus::Complete => {
                response.vertex_count = job.vertex_count;
                response.face_count = job.face_count;
                response.is_watertight = job.is_watertight;
                response.generation_time_s = job.generation_time_s;
                response.gpu_metrics = job.gpu_metrics.clone();
                response.completed_at = job.completed_at;
                response.stl_url = job
                    .stl_path
                    .as_ref()
                    .map(|_| format!("/api/job/{}/stl", job.id));
                response.glb_url = job
                    .glb_path
                    .as_ref()
                    .map(|_| format!("/api/job/{}/glb", job.id));
            }
            JobStatus::Failed | JobStatus::Expired => {
                response.error = job.error_message.clone();
                response.error_step = job.error_step.clone();
            }
            _ => {}
        }

        response
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStatusResponse {
    pub queue: QueueSummary,
}

/// Submit an image for mesh generation.
#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "jobs",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Image file under the `file` field"),
    responses(
        (status = 200, description = "Job accepted", body = AdmissionTicket),
        (status = 400, description = "Invalid or unsupported image"),
        (status = 403, description = "Submitter banned"),
        (status = 429, description = "Upload quota exceeded"),
        (status = 503, description = "Queue full")
    )
)]
pub async fn upload_image(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<AdmissionTicket>, JobError> {
    let submitter = extract_ip_from_headers(&headers)
        .or_else(|| extract_ip_from_socket(Some(addr)))
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| JobError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| JobError::Validation(format!("Failed to read upload: {}", e)))?;
            upload = Some((filename, data.to_vec()));
            break;
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| JobError::Validation("Missing `file` field".to_string()))?;

    let ticket = state
        .admission
        .submit(Submission {
            submitter,
            user_agent,
            filename,
            data,
        })
        .await?;

    Ok(Json(ticket))
}

/// Get job status and, when finished, its result or error.
#[utoipa::path(
    get,
    path = "/api/job/{job_id}",
    tag = "jobs",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job found", body = JobResponse),
        (status = 404, description = "Job not found")
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, JobError> {
    let job = state.queue.get_job(job_id).await?;

    let queue_position = if job.status == JobStatus::Pending {
        Some(state.queue.queue_position(&job).await?)
    } else {
        None
    };

    Ok(Json(JobResponse::from_job(&job, queue_position)))
}

/// Download the generated STL.
#[utoipa::path(
    get,
    path = "/api/job/{job_id}/stl",
    tag = "jobs",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "STL bytes", body = Vec<u8>, content_type = "application/sla"),
        (status = 404, description = "Job or artifact not available")
    )
)]
pub async fn download_stl(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobError> {
    serve_artifact(&state, job_id, ArtifactKind::Stl).await
}

/// Download the generated GLB, when the worker produced one.
#[utoipa::path(
    get,
    path = "/api/job/{job_id}/glb",
    tag = "jobs",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "GLB bytes", body = Vec<u8>, content_type = "model/gltf-binary"),
        (status = 404, description = "Job or artifact not available")
    )
)]
pub async fn download_glb(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobError> {
    serve_artifact(&state, job_id, ArtifactKind::Glb).await
}

/// Queue counts by status.
#[utoipa::path(
    get,
    path = "/api/queue",
    tag = "jobs",
    responses((status = 200, description = "Queue summary", body = QueueStatusResponse))
)]
pub async fn queue_status(
    State(state): State<AppState>,
) -> Result<Json<QueueStatusResponse>, JobError> {
    let queue = state.queue.summary().await?;
    Ok(Json(QueueStatusResponse { queue }))
}

enum ArtifactKind {
    Stl,
    Glb,
}

impl ArtifactKind {
    fn content_type(&self) -> &'static str {
        match self {
            Self::Stl => "application/sla",
            Self::Glb => "model/gltf-binary",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Stl => "stl",
            Self::Glb => "glb",
        }
    }

    fn key<'a>(&self, job: &'a Job) -> Option<&'a str> {
        match self {
            Self::Stl => job.stl_path.as_deref(),
            Self::Glb => job.glb_path.as_deref(),
        }
    }
}

async fn serve_artifact(
    state: &AppState,
    job_id: Uuid,
    kind: ArtifactKind,
) -> Result<Response, JobError> {
    let job = state.queue.get_job(job_id).await?;

    if job.status != JobStatus::Complete {
        return Err(JobError::NotFound(job_id));
    }
    let key = kind
        .key(&job)
        .ok_or_else(|| JobError::NotFound(job_id))?
        .to_string();

    let bytes = state.storage.read_output(&key).await?;

    // Download name keeps the upload's stem
    let stem = job
        .original_filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(&job.original_filename);
    let disposition = format!("attachment; filename=\"{}.{}\"", stem, kind.extension());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, kind.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
