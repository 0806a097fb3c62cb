//! The reaper: promotes timed-out in-flight jobs to `expired`.
//!
//! A worker can vanish without a terminal message; the assignment timeout is
//! the authoritative backstop that returns such jobs to a settled state.
//! Expiry does not notify subscribers. A listener that cares sees the
//! terminal state in its next snapshot.

use std::time::Duration;

use domain_jobs::{JobRepository, QueueService};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub fn spawn<R: JobRepository + 'static>(
    queue: QueueService<R>,
    interval: Duration,
    job_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so a fresh start does not
        // race startup recovery.
        ticker.tick().await;

        info!(
            interval_s = interval.as_secs(),
            timeout_s = job_timeout.as_secs(),
            "Reaper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match queue.expire_stale(job_timeout).await {
                        Ok(expired) if !expired.is_empty() => {
                            metrics::counter!("jobs_expired_total")
                                .increment(expired.len() as u64);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Reaper sweep failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Reaper shutting down");
                    break;
                }
            }
        }
    })
}
