//! Admission controls for the confirmation pipeline.
//!
//! - [`RateLimiter`] -- fixed-window request budgets keyed by scope (IP, wallet)
//! - [`VerificationLock`] -- at most one in-flight verification per entry
//!
//! Both are best-effort controls. The in-memory backends protect a single
//! process; the Redis backends share state across instances. Correctness of
//! the ticket cap and proof uniqueness never depends on them: that is owned
//! by the atomic commit in the store.

pub mod config;
pub mod error;
pub mod lock;
pub mod rate_limit;
pub mod redis_backend;

use std::sync::Arc;

pub use config::{GuardBackend, GuardConfig, RateLimitConfig};
pub use error::{GuardError, GuardResult};
pub use lock::{with_lock, InMemoryVerificationLock, LockGuard, VerificationLock};
pub use rate_limit::{InMemoryRateLimiter, RateDecision, RateLimiter, RateLimits, Scope};
pub use redis_backend::{RedisRateLimiter, RedisVerificationLock};

/// Rate limits and verification lock built from one [`GuardConfig`].
#[derive(Clone)]
pub struct Guards {
    pub limits: RateLimits,
    pub lock: Arc<dyn VerificationLock>,
}

impl Guards {
    /// In-memory guards for tests and single-instance deployments.
    pub fn in_memory(config: &GuardConfig) -> Self {
        Self {
            limits: RateLimits::new(
                Arc::new(InMemoryRateLimiter::new(config.ip.clone())),
                Arc::new(InMemoryRateLimiter::new(config.wallet.clone())),
            ),
            lock: Arc::new(InMemoryVerificationLock::new()),
        }
    }

    /// Build the backend selected by `config.backend`.
    pub async fn from_config(config: &GuardConfig) -> GuardResult<Self> {
        match &config.backend {
            GuardBackend::Memory => Ok(Self::in_memory(config)),
            GuardBackend::Redis { url } => {
                let client = redis::Client::open(url.as_str())?;
                let conn = redis::aio::ConnectionManager::new(client).await?;
                tracing::info!(%url, "using redis-backed guards");
                Ok(Self {
                    limits: RateLimits::new(
                        Arc::new(RedisRateLimiter::new(conn.clone(), Scope::Ip, config.ip.clone())),
                        Arc::new(RedisRateLimiter::new(
                            conn.clone(),
                            Scope::Wallet,
                            config.wallet.clone(),
                        )),
                    ),
                    lock: Arc::new(RedisVerificationLock::new(conn, config.lock_ttl())),
                })
            }
        }
    }
}
