use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_helpers::audit::{extract_ip_from_headers, AuditEvent, AuditOutcome};
use tracing::warn;

use crate::auth::bearer_matches;
use crate::state::AppState;

/// Worker WebSocket endpoint.
///
/// The bearer token is checked before the upgrade; a mismatch never reaches
/// the bridge. Duplicate-session rejection happens after the upgrade, inside
/// the bridge, with close code 4000.
pub async fn worker_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !bearer_matches(&headers, &state.config.auth.worker_token) {
        warn!("Worker auth failed");
        AuditEvent::new("worker.connect", AuditOutcome::Denied)
            .with_ip(extract_ip_from_headers(&headers))
            .with_detail("bad token")
            .log();
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let bridge = state.bridge.clone();
    ws.on_upgrade(move |socket| bridge.handle_worker(socket))
}
