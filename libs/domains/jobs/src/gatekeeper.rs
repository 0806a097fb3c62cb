use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use tracing::debug;

use crate::ban;
use crate::entity;
use crate::error::JobResult;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Uploads left in the window, before this submission
    pub remaining: u64,
}

/// Ban and rate-limit policy consulted by admission.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gatekeeper: Send + Sync {
    /// Whether the submitter is banned (exact match or CIDR containment).
    async fn is_banned(&self, submitter: &str) -> JobResult<bool>;

    /// Whether the submitter is within the per-window upload quota.
    async fn check_quota(&self, submitter: &str) -> JobResult<QuotaDecision>;

    /// Drop any cached quota for the submitter (call after an accepted
    /// upload so the next check recounts).
    fn invalidate(&self, submitter: &str);
}

/// PostgreSQL-backed gatekeeper.
///
/// Bans come from the `ip_bans` table; quota is counted from job rows
/// created by the submitter in the last 24 hours, with a short-TTL cache in
/// front of the count query.
pub struct PgGatekeeper {
    db: DatabaseConnection,
    uploads_per_day: u64,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (u64, Instant)>>,
}

impl PgGatekeeper {
    pub fn new(db: DatabaseConnection, uploads_per_day: u64, cache_ttl: Duration) -> Self {
        Self {
            db,
            uploads_per_day,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn count_last_24h(&self, submitter: &str) -> JobResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let count = entity::Entity::find()
            .filter(entity::Column::Submitter.eq(submitter))
            .filter(entity::Column::CreatedAt.gte(cutoff))
            .count(&self.db)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Gatekeeper for PgGatekeeper {
    async fn is_banned(&self, submitter: &str) -> JobResult<bool> {
        let bans = ban::Entity::find().all(&self.db).await?;
        Ok(bans
            .iter()
            .any(|ban| ban_matches(&ban.ip_or_cidr, submitter)))
    }

    async fn check_quota(&self, submitter: &str) -> JobResult<QuotaDecision> {
        let now = Instant::now();

        let cached = {
            let cache = self.cache.lock().expect("quota cache poisoned");
            cache.get(submitter).copied()
        };
        let count = match cached {
            Some((count, at)) if now.duration_since(at) < self.cache_ttl => count,
            _ => {
                let count = self.count_last_24h(submitter).await?;
                let mut cache = self.cache.lock().expect("quota cache poisoned");
                cache.insert(submitter.to_string(), (count, now));
                count
            }
        };

        let remaining = self.uploads_per_day.saturating_sub(count);
        debug!(submitter, count, remaining, "Quota check");
        Ok(QuotaDecision {
            allowed: count < self.uploads_per_day,
            remaining,
        })
    }

    fn invalidate(&self, submitter: &str) {
        let mut cache = self.cache.lock().expect("quota cache poisoned");
        cache.remove(submitter);
    }
}

/// Match a ban entry (exact address or CIDR) against a submitter address.
///
/// Non-address submitter strings only match exactly.
fn ban_matches(ban: &str, submitter: &str) -> bool {
    if ban == submitter {
        return true;
    }

    let Some((network, prefix)) = ban.split_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    let (Ok(network), Ok(addr)) = (network.parse::<IpAddr>(), submitter.parse::<IpAddr>()) else {
        return false;
    };

    match (network, addr) {
        (IpAddr::V4(network), IpAddr::V4(addr)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
            (u32::from(network) ^ u32::from(addr)) & mask == 0
        }
        (IpAddr::V6(network), IpAddr::V6(addr)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                !0u128 << (128 - prefix)
            };
            (u128::from(network) ^ u128::from(addr)) & mask == 0
        }
        _ => false,
    }
}
