//! PostgreSQL connector for the meshforge services.
//!
//! Wraps SeaORM connection management with pool configuration, retry with
//! exponential backoff, a migration runner, and a health check usable from
//! readiness probes.
//!
//! # Example
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::postgres::{connect_from_config_with_retry, PostgresConfig};
//!
//! let config = PostgresConfig::from_env()?;
//! let db = connect_from_config_with_retry(config, None).await?;
//! database::postgres::run_migrations::<migration::Migrator>(&db, "coordinator").await?;
//! ```

pub mod common;
pub mod postgres;

pub use common::{DatabaseError, DatabaseResult, RetryConfig};
