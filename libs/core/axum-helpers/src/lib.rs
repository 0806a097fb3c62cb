//! # Axum Helpers
//!
//! Shared plumbing for the meshforge HTTP services:
//!
//! - **Server Management**: server setup with graceful shutdown and cleanup
//! - **Error Handling**: structured JSON error responses with proper HTTP status codes
//! - **Health Checks**: health and readiness endpoints
//! - **Audit**: structured audit events routed to the `audit` log target
//! - **Client identity**: proxy-aware client IP extraction

pub mod audit;
pub mod errors;
pub mod health;
pub mod server;
pub mod shutdown;

// Re-export commonly used types
pub use errors::{not_found, AppError, ErrorResponse};
pub use health::{health_router, HealthResponse};
pub use server::{create_app, create_production_app};
pub use shutdown::{shutdown_signal, ShutdownCoordinator};

pub use audit::{extract_ip_from_headers, extract_ip_from_socket, AuditEvent, AuditOutcome};
