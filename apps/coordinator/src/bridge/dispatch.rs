//! The dispatch loop: claims pending work and sends it to the worker.
//!
//! Runs as a task owned by the worker session and dies with it. Only one
//! dispatch task exists at a time (one per session, at most one session),
//! which together with the transactional claim keeps a single job in flight.

use std::sync::Arc;

use base64::prelude::*;
use domain_jobs::{JobRepository, ServerMessage};
use storage::{Storage, StorageError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::WorkerBridge;

pub(super) async fn run<R, S>(
    bridge: Arc<WorkerBridge<R, S>>,
    out_tx: mpsc::Sender<ServerMessage>,
) where
    R: JobRepository + 'static,
    S: Storage + 'static,
{
    let mut ticker = tokio::time::interval(bridge.dispatch_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if bridge.is_paused() {
            continue;
        }
        // A worker that reported itself busy or unhealthy gets no new work
        if let Some(gpu) = bridge.gpu_status() {
            if !gpu.available {
                continue;
            }
        }

        let job = match bridge.queue().claim_next_pending().await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                error!("Dispatch claim failed: {}", e);
                continue;
            }
        };

        let image = match bridge.storage().read_input(&job.input_path).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                warn!(job_id = %job.id, "Upload file missing at dispatch, failing job");
                if let Err(e) = bridge
                    .queue()
                    .mark_failed(job.id, "Upload file missing", Some("queued".to_string()))
                    .await
                {
                    error!(job_id = %job.id, "Could not fail job with missing input: {}", e);
                }
                continue;
            }
            Err(e) => {
                // Transient storage trouble: leave the job assigned, the
                // reaper will recycle it if this never recovers.
                error!(job_id = %job.id, "Failed to read input: {}", e);
                continue;
            }
        };

        let frame = ServerMessage::JobAssign {
            job_id: job.id,
            image_filename: job.original_filename.clone(),
            image_base64: BASE64_STANDARD.encode(&image),
            settings: job.settings.clone(),
        };

        if out_tx.send(frame).await.is_err() {
            // Session is gone; the job stays assigned for the reaper or a
            // reconnecting worker session's recovery path.
            warn!(job_id = %job.id, "Worker channel closed mid-dispatch");
            break;
        }

        metrics::counter!("jobs_dispatched_total").increment(1);
        info!(job_id = %job.id, bytes = image.len(), "Dispatched job to worker");
    }
}
