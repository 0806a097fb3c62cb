use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use domain_jobs::{Job, JobError, JobStatus, ListenerEvent};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

/// A listener that sends nothing for this long is disconnected. Any inbound
/// frame (client pings, keepalive text) resets the timer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-job progress stream.
///
/// Protocol: one `status` snapshot, then live `progress` events, terminated
/// by `complete`/`failed`; a single `error` event when the job id is
/// unknown. The snapshot is read *before* subscribing, and terminal jobs are
/// answered entirely from the store, so a listener can never hang waiting
/// for events that already happened.
pub async fn job_events_ws(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_listener(state, job_id, socket))
}

async fn send_event(socket: &mut WebSocket, event: &ListenerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize listener event: {}", e);
            false
        }
    }
}

/// Synthesize the final event for a job that is already settled.
fn terminal_event(job: &Job) -> Option<ListenerEvent> {
    match job.status {
        JobStatus::Complete => Some(ListenerEvent::Complete {
            job_id: job.id,
            vertex_count: job.vertex_count,
            face_count: job.face_count,
            is_watertight: job.is_watertight,
            generation_time_s: job.generation_time_s,
        }),
        JobStatus::Failed => Some(ListenerEvent::Failed {
            job_id: job.id,
            error: job.error_message.clone(),
            step: job.error_step.clone(),
        }),
        // Expiry is a backstop, not a user-facing failure channel: the
        // status snapshot already told the listener everything.
        _ => None,
    }
}

async fn handle_listener(state: AppState, job_id: Uuid, mut socket: WebSocket) {
    let job = match state.queue.get_job(job_id).await {
        Ok(job) => job,
        Err(JobError::NotFound(_)) => {
            let _ = send_event(
                &mut socket,
                &ListenerEvent::Error {
                    message: "Job not found".to_string(),
                },
            )
            .await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            warn!(%job_id, "Failed to load job for listener: {}", e);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    // Current state first, so the listener is never stuck at a stale view
    let snapshot = ListenerEvent::Status {
        job_id: job.id,
        status: job.status,
        step: job.current_step.clone(),
        progress_pct: job.progress_pct,
        message: job.progress_message.clone(),
    };
    if !send_event(&mut socket, &snapshot).await {
        return;
    }

    if job.is_terminal() {
        if let Some(event) = terminal_event(&job) {
            let _ = send_event(&mut socket, &event).await;
        }
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (listener_id, mut events) = state.bridge.subscribers().subscribe(job_id);
    metrics::gauge!("progress_listeners").increment(1.0);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // Dropped by fan-out (lagging) or registry shutdown
                    break;
                };
                let terminal = matches!(
                    event,
                    ListenerEvent::Complete { .. } | ListenerEvent::Failed { .. }
                );
                if !send_event(&mut socket, &event).await {
                    break;
                }
                if terminal {
                    break;
                }
            }

            inbound = tokio::time::timeout(IDLE_TIMEOUT, socket.recv()) => {
                match inbound {
                    Err(_) => {
                        debug!(%job_id, "Listener idle timeout");
                        break;
                    }
                    Ok(None) | Ok(Some(Err(_))) => break, // client gone
                    Ok(Some(Ok(Message::Close(_)))) => break,
                    Ok(Some(Ok(_))) => {} // any input keeps the session alive
                }
            }
        }
    }

    state.bridge.subscribers().unsubscribe(job_id, listener_id);
    metrics::gauge!("progress_listeners").decrement(1.0);
    let _ = socket.send(Message::Close(None)).await;
}
