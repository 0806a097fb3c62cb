//! HTTP surface: public job routes, admin routes, readiness.

pub mod admin;
pub mod jobs;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_helpers::health::{run_health_checks, HealthCheckFuture};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(jobs::upload_image))
        .route("/api/job/{job_id}", get(jobs::get_job))
        .route("/api/job/{job_id}/stl", get(jobs::download_stl))
        .route("/api/job/{job_id}/glb", get(jobs::download_glb))
        .route("/api/queue", get(jobs::queue_status))
        .with_state(state)
}

/// Readiness probe router: `/ready` checks live dependencies.
pub fn ready_router(state: AppState) -> Router {
    Router::new()
        .route("/ready", get(ready_handler))
        .with_state(state)
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let checks: Vec<(&str, HealthCheckFuture)> = vec![(
        "database",
        Box::pin(async {
            database::postgres::check_health(&state.db)
                .await
                .map_err(|e| e.to_string())
        }),
    )];

    match run_health_checks(checks).await {
        Ok((status, body)) => (status, body),
        Err((status, body)) => (status, body),
    }
}

/// Worker-facing health summary, mirrored on the public surface.
pub fn status_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .with_state(state)
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "worker_connected": state.bridge.worker_connected(),
            "paused": state.bridge.is_paused(),
        })),
    )
}
