//! Structured audit logging.
//!
//! Audit events are security- or lifecycle-relevant actions (uploads, job
//! completions, admin commands). They are emitted to the `audit` tracing
//! target so the logging backend can route them separately from app logs.
//!
//! # Example
//! ```ignore
//! use axum_helpers::audit::{AuditEvent, AuditOutcome};
//!
//! AuditEvent::new("job.complete", AuditOutcome::Success)
//!     .with_job_id(job_id.to_string())
//!     .with_detail(format!("vertices={}", vertex_count))
//!     .log();
//! ```

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;

/// Outcome of an audited action.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed (e.g., validation error, worker-reported failure)
    Failure,
    /// Action was denied (e.g., ban, rate limit, bad token)
    Denied,
}

/// Structured audit event.
///
/// Built with optional fields via the builder methods, then emitted with
/// [`AuditEvent::log`].
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Action performed (e.g., "upload", "job.complete", "admin.pause")
    pub action: String,
    /// Outcome of the action
    pub outcome: AuditOutcome,
    /// Job affected, if any
    pub job_id: Option<String>,
    /// Client IP address, if the action originated from a client
    pub client_ip: Option<String>,
    /// Free-form detail
    pub detail: Option<String>,
    /// When the event occurred
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            action: action.into(),
            outcome,
            job_id: None,
            client_ip: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.client_ip = ip;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Emit the event to the `audit` log target with structured fields.
    pub fn log(self) {
        tracing::info!(
            target: "audit",
            action = %self.action,
            outcome = ?self.outcome,
            job_id = self.job_id,
            client_ip = self.client_ip,
            detail = self.detail,
            timestamp = %self.timestamp,
            "{}",
            serde_json::to_string(&self)
                .unwrap_or_else(|_| "Failed to serialize audit event".to_string())
        );
    }
}

/// Extract the client IP from proxy headers.
///
/// Checks X-Forwarded-For (first entry) and X-Real-IP, in that order, for
/// deployments behind a proxy or load balancer.
pub fn extract_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
}

/// Fallback when proxy headers are not available.
pub fn extract_ip_from_socket(socket: Option<SocketAddr>) -> Option<String> {
    socket.map(|addr| addr.ip().to_string())
}
