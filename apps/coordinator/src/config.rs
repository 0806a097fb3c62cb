use std::time::{Duration, SystemTime, UNIX_EPOCH};

use core_config::server::ServerConfig;
use core_config::{env_or_default, env_parse_or_default, ConfigError, Environment, FromEnv};
use database::postgres::PostgresConfig;
use domain_jobs::GenerationSettings;
use sha2::{Digest, Sha256};

/// Coordinator configuration, aggregated from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: PostgresConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub defaults: GenerationSettings,
}

/// Bearer tokens for the worker socket and the admin API.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub worker_token: String,
    pub admin_token: String,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub output_dir: String,
}

/// Queue, dispatch and admission tunables.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Submissions beyond this many pending jobs get `queue_full`
    pub max_pending_jobs: u64,
    /// Upload size cap in bytes
    pub max_upload_bytes: usize,
    /// Per-submitter uploads per 24h window
    pub uploads_per_day: u64,
    /// TTL of the quota count cache
    pub quota_cache_ttl: Duration,
    /// In-flight jobs older than this are expired by the reaper
    pub job_timeout: Duration,
    /// Reaper tick interval
    pub reap_interval: Duration,
    /// Dispatch loop poll interval
    pub dispatch_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: PostgresConfig::from_env()?,
            auth: AuthConfig::load(&environment),
            storage: StorageConfig {
                upload_dir: env_or_default("UPLOAD_DIR", "uploads"),
                output_dir: env_or_default("OUTPUT_DIR", "outputs"),
            },
            queue: QueueConfig {
                max_pending_jobs: env_parse_or_default("MAX_PENDING_JOBS", "50")?,
                // 20 MB
                max_upload_bytes: env_parse_or_default("MAX_UPLOAD_BYTES", "20971520")?,
                uploads_per_day: env_parse_or_default("UPLOADS_PER_DAY", "20")?,
                quota_cache_ttl: Duration::from_secs(env_parse_or_default(
                    "QUOTA_CACHE_TTL_S",
                    "60",
                )?),
                job_timeout: Duration::from_secs(env_parse_or_default("JOB_TIMEOUT_S", "600")?),
                reap_interval: Duration::from_secs(env_parse_or_default(
                    "REAP_INTERVAL_S",
                    "120",
                )?),
                dispatch_interval: Duration::from_secs(env_parse_or_default(
                    "DISPATCH_INTERVAL_S",
                    "2",
                )?),
            },
            defaults: GenerationSettings {
                steps: env_parse_or_default("DEFAULT_STEPS", "50")?,
                guidance: env_parse_or_default("DEFAULT_GUIDANCE", "5.0")?,
                octree_res: env_parse_or_default("DEFAULT_OCTREE_RES", "384")?,
                seed: env_parse_or_default("DEFAULT_SEED", "42")?,
                height_mm: env_parse_or_default("DEFAULT_HEIGHT_MM", "100.0")?,
            },
            environment,
        })
    }
}

impl AuthConfig {
    /// Load tokens from the environment.
    ///
    /// An unset token is replaced with a random one for the session, with a
    /// loud warning: safe for development, useless for a deployed worker
    /// that needs to know the token.
    fn load(environment: &Environment) -> Self {
        Self {
            worker_token: Self::token_or_random("WORKER_AUTH_TOKEN", environment),
            admin_token: Self::token_or_random("ADMIN_AUTH_TOKEN", environment),
        }
    }

    fn token_or_random(key: &str, environment: &Environment) -> String {
        match std::env::var(key) {
            Ok(token) if !token.is_empty() => token,
            _ => {
                let token = random_token(key);
                tracing::warn!(
                    "{} not set, using a random token for this session. \
                     Set {} for {:?} use.",
                    key,
                    key,
                    environment
                );
                eprintln!(
                    "WARNING: {} not set -- using random token for this session.",
                    key
                );
                token
            }
        }
    }
}

/// Random, unguessable token derived from clock and process entropy.
fn random_token(key: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [(&str, Option<&str>); 1] =
        [("DATABASE_URL", Some("postgres://localhost/meshforge"))];

    #[test]
    fn test_config_defaults() {
        temp_env::with_vars(REQUIRED, || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.queue.max_pending_jobs, 50);
            assert_eq!(config.queue.max_upload_bytes, 20 * 1024 * 1024);
            assert_eq!(config.queue.uploads_per_day, 20);
            assert_eq!(config.queue.job_timeout, Duration::from_secs(600));
            assert_eq!(config.queue.reap_interval, Duration::from_secs(120));
            assert_eq!(config.queue.dispatch_interval, Duration::from_secs(2));
            assert_eq!(config.storage.upload_dir, "uploads");
            assert_eq!(config.defaults, GenerationSettings::default());
        });
    }

    #[test]
    fn test_config_overrides() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/meshforge")),
                ("MAX_PENDING_JOBS", Some("5")),
                ("JOB_TIMEOUT_S", Some("30")),
                ("DEFAULT_STEPS", Some("25")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.queue.max_pending_jobs, 5);
                assert_eq!(config.queue.job_timeout, Duration::from_secs(30));
                assert_eq!(config.defaults.steps, 25);
            },
        );
    }

    #[test]
    fn test_config_rejects_garbage_tunables() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/meshforge")),
                ("MAX_PENDING_JOBS", Some("many")),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn test_auth_tokens_from_env() {
        temp_env::with_vars(
            [
                ("WORKER_AUTH_TOKEN", Some("worker-secret")),
                ("ADMIN_AUTH_TOKEN", Some("admin-secret")),
            ],
            || {
                let auth = AuthConfig::load(&Environment::Development);
                assert_eq!(auth.worker_token, "worker-secret");
                assert_eq!(auth.admin_token, "admin-secret");
            },
        );
    }

    #[test]
    fn test_missing_tokens_get_random_values() {
        temp_env::with_vars(
            [
                ("WORKER_AUTH_TOKEN", None::<&str>),
                ("ADMIN_AUTH_TOKEN", None),
            ],
            || {
                let auth = AuthConfig::load(&Environment::Development);
                assert_eq!(auth.worker_token.len(), 64);
                assert_ne!(auth.worker_token, auth.admin_token);
            },
        );
    }
}
