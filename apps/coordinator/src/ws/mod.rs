//! WebSocket surfaces: the worker link and per-job progress listeners.

pub mod listener;
pub mod worker;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/worker", get(worker::worker_ws))
        .route("/ws/job/{job_id}", get(listener::job_events_ws))
        .with_state(state)
}
