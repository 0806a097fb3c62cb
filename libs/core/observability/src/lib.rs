//! Observability utilities for the meshforge coordinator.
//!
//! Provides the Prometheus metrics recorder and the `/metrics` endpoint
//! handler. Metric names are described here so the exposition carries HELP
//! text.
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler};
//!
//! init_metrics();
//!
//! let app = Router::new().route("/metrics", get(metrics_handler));
//! metrics::counter!("jobs_dispatched_total").increment(1);
//! ```

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at application startup; subsequent calls return the existing
/// handle (safe in tests).
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        register_metric_descriptions();

        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_gauge};

    // Queue metrics
    describe_counter!("jobs_enqueued_total", "Jobs accepted by admission");
    describe_counter!("jobs_rejected_total", "Submissions rejected at admission");
    describe_counter!("jobs_dispatched_total", "Jobs sent to the worker");
    describe_counter!("jobs_completed_total", "Jobs finished successfully");
    describe_counter!("jobs_failed_total", "Jobs failed by the worker");
    describe_counter!("jobs_expired_total", "Jobs expired by the reaper");
    describe_gauge!("jobs_pending", "Jobs currently waiting in the queue");

    // Worker bridge metrics
    describe_gauge!("worker_connected", "1 when a worker session is live");
    describe_counter!(
        "worker_messages_total",
        "Messages received from the worker"
    );
    describe_gauge!("progress_listeners", "Currently subscribed listeners");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_and_render() {
        init_metrics();
        metrics::counter!("jobs_dispatched_total").increment(1);

        let body = metrics_handler().await;
        assert!(body.contains("jobs_dispatched_total"));
    }

    #[tokio::test]
    async fn test_double_init_is_safe() {
        init_metrics();
        init_metrics();
        assert!(get_metrics_handle().is_some());
    }
}
