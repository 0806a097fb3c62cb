//! The worker bridge: owns the single live worker session, routes its
//! messages, drives the dispatch loop, and fans progress out to listeners.
//!
//! At most one worker session exists at a time; a second connection is
//! closed with code 4000. On disconnect the session and cached GPU state are
//! cleared and the dispatch task is cancelled. Jobs left assigned or
//! processing stay as they are: the worker may reconnect with the job still
//! running, so the reaper's timeout is the authoritative backstop.

mod dispatch;
mod subscribers;

pub use subscribers::{ListenerId, SubscriberRegistry};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum_helpers::audit::{AuditEvent, AuditOutcome};
use base64::prelude::*;
use domain_jobs::{
    CommandAction, GpuSnapshot, JobCompletePayload, JobRepository, ListenerEvent, MeshOutput,
    ProgressUpdate, QueueService, ServerMessage, WorkerInfo, WorkerMessage,
};
use futures::{SinkExt, StreamExt};
use storage::Storage;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Close code sent to a worker when a session already exists.
const CLOSE_DUPLICATE_WORKER: u16 = 4000;

/// Outbound frames buffered toward the worker socket.
const OUTBOUND_BUFFER: usize = 64;

/// A live worker connection: the sender feeding its socket writer task.
struct WorkerSession {
    tx: mpsc::Sender<ServerMessage>,
}

pub struct WorkerBridge<R: JobRepository, S: Storage> {
    queue: QueueService<R>,
    storage: Arc<S>,
    dispatch_interval: Duration,
    session: RwLock<Option<WorkerSession>>,
    worker_info: RwLock<Option<WorkerInfo>>,
    gpu_status: RwLock<Option<GpuSnapshot>>,
    paused: AtomicBool,
    subscribers: SubscriberRegistry,
}

impl<R, S> WorkerBridge<R, S>
where
    R: JobRepository + 'static,
    S: Storage + 'static,
{
    pub fn new(queue: QueueService<R>, storage: Arc<S>, dispatch_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            queue,
            storage,
            dispatch_interval,
            session: RwLock::new(None),
            worker_info: RwLock::new(None),
            gpu_status: RwLock::new(None),
            paused: AtomicBool::new(false),
            subscribers: SubscriberRegistry::new(),
        })
    }

    // ─── State access ──────────────────────────────────────────────

    pub fn worker_connected(&self) -> bool {
        self.session.read().expect("session lock poisoned").is_some()
    }

    pub fn worker_info(&self) -> Option<WorkerInfo> {
        self.worker_info
            .read()
            .expect("worker info lock poisoned")
            .clone()
    }

    pub fn gpu_status(&self) -> Option<GpuSnapshot> {
        self.gpu_status
            .read()
            .expect("gpu status lock poisoned")
            .clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Flip the dispatch-side paused flag; takes effect on the next tick,
    /// before the worker even confirms.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        info!(paused, "Dispatch paused flag changed");
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    pub(crate) fn queue(&self) -> &QueueService<R> {
        &self.queue
    }

    pub(crate) fn storage(&self) -> &S {
        &self.storage
    }

    fn outbound(&self) -> Option<mpsc::Sender<ServerMessage>> {
        self.session
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|session| session.tx.clone())
    }

    // ─── Worker connection ─────────────────────────────────────────

    /// Main loop for an authenticated worker socket.
    ///
    /// Installs the session (or rejects a duplicate), pumps outbound frames
    /// from the session channel, routes inbound messages, and tears
    /// everything down when the socket closes.
    pub async fn handle_worker(self: Arc<Self>, mut socket: WebSocket) {
        let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

        let installed = {
            let mut session = self.session.write().expect("session lock poisoned");
            if session.is_some() {
                false
            } else {
                *session = Some(WorkerSession { tx: out_tx.clone() });
                true
            }
        };

        if !installed {
            warn!("Rejecting duplicate worker connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_DUPLICATE_WORKER,
                    reason: "Another worker already connected".into(),
                })))
                .await;
            return;
        }

        info!("Worker connected");
        metrics::gauge!("worker_connected").set(1.0);

        let (mut ws_sink, mut ws_stream) = socket.split();

        // Writer task: serialize frames from the session channel onto the
        // socket. Ends when the channel closes or the socket errors.
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize worker frame: {}", e);
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        let _ = out_tx
            .send(ServerMessage::Welcome {
                message: "Connected to server".to_string(),
            })
            .await;

        let dispatch = tokio::spawn(dispatch::run(self.clone(), out_tx.clone()));

        while let Some(frame) = ws_stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<WorkerMessage>(&text) {
                    Ok(message) => self.route(message).await,
                    Err(e) => warn!("Undecodable worker frame: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // transport ping/pong
                Err(e) => {
                    warn!("Worker socket error: {}", e);
                    break;
                }
            }
        }

        // Teardown. In-flight jobs are deliberately left alone (see module
        // docs); the reaper reclaims them if the worker never returns.
        dispatch.abort();
        writer.abort();
        *self.session.write().expect("session lock poisoned") = None;
        *self.worker_info.write().expect("worker info lock poisoned") = None;
        *self.gpu_status.write().expect("gpu status lock poisoned") = None;
        metrics::gauge!("worker_connected").set(0.0);
        info!("Worker disconnected, cleaned up");
    }

    // ─── Inbound routing ───────────────────────────────────────────

    async fn route(&self, message: WorkerMessage) {
        metrics::counter!("worker_messages_total").increment(1);

        match message {
            WorkerMessage::WorkerHello(worker_info) => {
                info!(
                    gpu = %worker_info.gpu_name,
                    vram_gb = worker_info.vram_total_gb,
                    version = %worker_info.worker_version,
                    "Worker hello"
                );
                *self.worker_info.write().expect("worker info lock poisoned") = Some(worker_info);
            }

            WorkerMessage::GpuStatus(snapshot) => {
                *self.gpu_status.write().expect("gpu status lock poisoned") = Some(snapshot);
            }

            WorkerMessage::JobProgress {
                job_id,
                step,
                progress_pct,
                message,
            } => {
                // Persist first, then fan out what was stored: listeners
                // never see a value a later subscriber could not read back.
                let update = ProgressUpdate {
                    step,
                    pct: progress_pct,
                    message,
                };
                match self.queue.record_progress(job_id, update).await {
                    Ok(Some(job)) => {
                        self.subscribers.fan_out(
                            job_id,
                            ListenerEvent::Progress {
                                job_id,
                                step: job.current_step,
                                progress_pct: job.progress_pct,
                                message: job.progress_message,
                            },
                        );
                    }
                    Ok(None) => {} // unknown or settled job, already logged
                    Err(e) => error!(%job_id, "Failed to record progress: {}", e),
                }
            }

            WorkerMessage::JobComplete(payload) => self.handle_job_complete(payload).await,

            WorkerMessage::JobFailed {
                job_id,
                error: worker_error,
                step,
            } => self.handle_job_failed(job_id, worker_error, step).await,

            WorkerMessage::Pong => debug!("Worker pong"),

            WorkerMessage::WorkerBye { reason } => {
                info!(reason = ?reason, "Worker sent bye");
            }

            WorkerMessage::Unknown => warn!("Unknown worker message type, dropping"),
        }
    }

    async fn handle_job_complete(&self, payload: JobCompletePayload) {
        let job_id = payload.job_id;

        let stl_path = self
            .store_artifact(job_id, payload.stl_base64.as_deref(), "model.stl")
            .await;
        let glb_path = self
            .store_artifact(job_id, payload.glb_base64.as_deref(), "model.glb")
            .await;

        let output = MeshOutput {
            stl_path,
            glb_path,
            vertex_count: payload.vertex_count,
            face_count: payload.face_count,
            is_watertight: payload.is_watertight,
            generation_time_s: payload.generation_time_s,
            gpu_metrics: payload.gpu_metrics,
        };

        match self.queue.mark_complete(job_id, output).await {
            Ok(job) => {
                metrics::counter!("jobs_completed_total").increment(1);
                AuditEvent::new("job.complete", AuditOutcome::Success)
                    .with_job_id(job_id.to_string())
                    .with_detail(format!("vertices={}", payload.vertex_count))
                    .log();
                self.subscribers.fan_out(
                    job_id,
                    ListenerEvent::Complete {
                        job_id,
                        vertex_count: job.vertex_count,
                        face_count: job.face_count,
                        is_watertight: job.is_watertight,
                        generation_time_s: job.generation_time_s,
                    },
                );
            }
            Err(e) => error!(%job_id, "Failed to mark job complete: {}", e),
        }
    }

    async fn handle_job_failed(&self, job_id: Uuid, worker_error: String, step: Option<String>) {
        match self
            .queue
            .mark_failed(job_id, worker_error.clone(), step.clone())
            .await
        {
            Ok(_) => {
                metrics::counter!("jobs_failed_total").increment(1);
                AuditEvent::new("job.failed", AuditOutcome::Failure)
                    .with_job_id(job_id.to_string())
                    .with_detail(worker_error.clone())
                    .log();
                self.subscribers.fan_out(
                    job_id,
                    ListenerEvent::Failed {
                        job_id,
                        error: Some(worker_error),
                        step,
                    },
                );
            }
            Err(e) => error!(%job_id, "Failed to mark job failed: {}", e),
        }
    }

    /// Decode and persist one base64 artifact; returns its storage key.
    async fn store_artifact(
        &self,
        job_id: Uuid,
        base64_data: Option<&str>,
        filename: &str,
    ) -> Option<String> {
        let encoded = base64_data?;
        let bytes = match BASE64_STANDARD.decode(encoded) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%job_id, filename, "Undecodable artifact from worker: {}", e);
                return None;
            }
        };

        let key = format!("{}/{}", job_id, filename);
        match self.storage.save_output(&bytes, &key).await {
            Ok(()) => Some(key),
            Err(e) => {
                error!(%job_id, key, "Failed to store artifact: {}", e);
                None
            }
        }
    }

    // ─── Admin commands ────────────────────────────────────────────

    /// Forward a command frame to the worker. Returns false when no worker
    /// is connected.
    pub async fn send_command(&self, action: CommandAction, job_id: Option<Uuid>) -> bool {
        let Some(tx) = self.outbound() else {
            return false;
        };
        tx.send(ServerMessage::Command { action, job_id })
            .await
            .is_ok()
    }

    pub async fn send_ping(&self) -> bool {
        let Some(tx) = self.outbound() else {
            return false;
        };
        tx.send(ServerMessage::Ping).await.is_ok()
    }
}
