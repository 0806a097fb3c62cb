//! Admin endpoints: dashboard, worker commands, retry, ban management.
//!
//! Every route requires `Authorization: Bearer $ADMIN_AUTH_TOKEN`.

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_helpers::audit::{AuditEvent, AuditOutcome};
use axum_helpers::AppError;
use chrono::Utc;
use domain_jobs::protocol::{CommandAction, GpuSnapshot, WorkerInfo};
use domain_jobs::{ban, JobError, QueueSummary};
use sea_orm::ActiveValue::Set;
use sea_orm::{EntityTrait, ModelTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::bearer_matches;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/pause", post(pause_worker))
        .route("/admin/resume", post(resume_worker))
        .route("/admin/force/{job_id}", post(force_process))
        .route("/admin/ping", post(ping_worker))
        .route("/admin/retry/{job_id}", post(retry_job))
        .route("/admin/bans", get(list_bans).post(create_ban))
        .route("/admin/bans/{ban_id}", axum::routing::delete(delete_ban))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !bearer_matches(request.headers(), &state.config.auth.admin_token) {
        return AppError::Unauthorized("Invalid admin token".to_string()).into_response();
    }
    next.run(request).await
}

// ─── Dashboard ─────────────────────────────────────────────────

#[derive(Serialize)]
struct WorkerPanel {
    connected: bool,
    info: Option<WorkerInfo>,
    gpu_status: Option<GpuSnapshot>,
    paused: bool,
}

#[derive(Serialize)]
struct CompletionStats {
    total_completed: u64,
    avg_generation_time_s: Option<f64>,
}

#[derive(Serialize)]
struct DashboardResponse {
    worker: WorkerPanel,
    queue: QueueSummary,
    stats: CompletionStats,
}

async fn dashboard(State(state): State<AppState>) -> Result<Response, JobError> {
    let queue = state.queue.summary().await?;
    let (total_completed, avg_time) = state.queue.completed_stats().await?;

    let body = DashboardResponse {
        worker: WorkerPanel {
            connected: state.bridge.worker_connected(),
            info: state.bridge.worker_info(),
            gpu_status: state.bridge.gpu_status(),
            paused: state.bridge.is_paused(),
        },
        queue,
        stats: CompletionStats {
            total_completed,
            avg_generation_time_s: avg_time.map(|t| (t * 10.0).round() / 10.0),
        },
    };

    Ok(Json(body).into_response())
}

// ─── Worker commands ───────────────────────────────────────────

async fn pause_worker(State(state): State<AppState>) -> Response {
    state.bridge.set_paused(true);
    state.bridge.send_command(CommandAction::Pause, None).await;
    AuditEvent::new("admin.pause", AuditOutcome::Success).log();
    Json(json!({"status": "paused"})).into_response()
}

async fn resume_worker(State(state): State<AppState>) -> Response {
    state.bridge.set_paused(false);
    state.bridge.send_command(CommandAction::Resume, None).await;
    AuditEvent::new("admin.resume", AuditOutcome::Success).log();
    Json(json!({"status": "resumed"})).into_response()
}

async fn force_process(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    let sent = state
        .bridge
        .send_command(CommandAction::ForceProcess, Some(job_id))
        .await;
    if !sent {
        return AppError::ServiceUnavailable("Worker not connected".to_string()).into_response();
    }
    Json(json!({"status": "force_process sent"})).into_response()
}

async fn ping_worker(State(state): State<AppState>) -> Response {
    if !state.bridge.send_ping().await {
        return AppError::ServiceUnavailable("Worker not connected".to_string()).into_response();
    }
    Json(json!({"status": "ping sent"})).into_response()
}

// ─── Retry ─────────────────────────────────────────────────────

/// Put a settled job back in the queue. Only terminal jobs qualify; all
/// derived state (progress, result, error, timestamps) is cleared.
async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobError> {
    let job = state.queue.retry(job_id).await?;
    AuditEvent::new("admin.retry", AuditOutcome::Success)
        .with_job_id(job_id.to_string())
        .log();
    info!(%job_id, "Admin retried job");
    Ok(Json(json!({"job_id": job.id, "status": job.status})).into_response())
}

// ─── IP Ban CRUD ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BanCreate {
    ip_or_cidr: String,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct BanResponse {
    id: i32,
    ip_or_cidr: String,
    reason: Option<String>,
    created_at: String,
}

async fn list_bans(State(state): State<AppState>) -> Result<Response, JobError> {
    let bans = ban::Entity::find().all(&state.db).await?;
    let body: Vec<BanResponse> = bans
        .into_iter()
        .map(|ban| BanResponse {
            id: ban.id,
            ip_or_cidr: ban.ip_or_cidr,
            reason: ban.reason,
            created_at: ban.created_at.to_rfc3339(),
        })
        .collect();
    Ok(Json(body).into_response())
}

async fn create_ban(
    State(state): State<AppState>,
    Json(body): Json<BanCreate>,
) -> Result<Response, JobError> {
    if body.ip_or_cidr.trim().is_empty() {
        return Err(JobError::Validation("ip_or_cidr must not be empty".to_string()));
    }

    let active = ban::ActiveModel {
        ip_or_cidr: Set(body.ip_or_cidr.clone()),
        reason: Set(body.reason),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    };
    let created = ban::Entity::insert(active)
        .exec_with_returning(&state.db)
        .await?;

    AuditEvent::new("admin.ban", AuditOutcome::Success)
        .with_detail(created.ip_or_cidr.clone())
        .log();
    Ok(Json(json!({"id": created.id, "ip_or_cidr": created.ip_or_cidr})).into_response())
}

async fn delete_ban(
    State(state): State<AppState>,
    Path(ban_id): Path<i32>,
) -> Result<Response, JobError> {
    let Some(found) = ban::Entity::find_by_id(ban_id).one(&state.db).await? else {
        return Ok(AppError::NotFound(format!("Ban {} not found", ban_id)).into_response());
    };

    found.delete(&state.db).await?;
    Ok(Json(json!({"deleted": true})).into_response())
}
