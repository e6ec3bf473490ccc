//! Redis-backed guards for multi-instance deployments.
//!
//! Rate limits use an atomic `SET NX PX` + `INCR` + `PTTL` transaction so the
//! window starts on the first request and expires on its own. Verification
//! locks use `SET NX PX` with a per-acquisition token and a compare-and-delete
//! script on release, so an instance never frees a lock it no longer owns.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use raffle_types::EntryId;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{GuardError, GuardResult};
use crate::lock::VerificationLock;
use crate::rate_limit::{RateDecision, RateLimiter, Scope};

/// Key prefixes
pub mod keys {
    pub const RATE_LIMIT: &str = "raffle:rl";
    pub const VERIFY_LOCK: &str = "raffle:verify-lock";
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Fixed-window limiter shared through Redis.
#[derive(Clone)]
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    scope: Scope,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, scope: Scope, config: RateLimitConfig) -> Self {
        Self {
            redis,
            scope,
            config,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}:{}", keys::RATE_LIMIT, self.scope.prefix(), key)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str) -> GuardResult<RateDecision> {
        let redis_key = self.key(key);
        let mut conn = self.redis.clone();

        let (count, ttl_ms): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&redis_key)
            .arg(0)
            .arg("NX")
            .arg("PX")
            .arg(self.config.window_ms)
            .ignore()
            .cmd("INCR")
            .arg(&redis_key)
            .cmd("PTTL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await?;

        let reset_after = if ttl_ms > 0 {
            Duration::from_millis(ttl_ms as u64)
        } else {
            self.config.window()
        };
        let limit = u64::from(self.config.limit);
        Ok(RateDecision {
            allowed: count <= limit,
            remaining: limit.saturating_sub(count) as u32,
            reset_after,
        })
    }
}

/// Verification lock shared through Redis.
pub struct RedisVerificationLock {
    redis: ConnectionManager,
    ttl: Duration,
    tokens: Mutex<HashMap<EntryId, String>>,
}

impl RedisVerificationLock {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn key(entry: &EntryId) -> String {
        format!("{}:{}", keys::VERIFY_LOCK, entry)
    }
}

#[async_trait]
impl VerificationLock for RedisVerificationLock {
    async fn try_acquire(&self, entry: &EntryId) -> GuardResult<bool> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(entry))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Ok(false);
        }
        self.tokens
            .lock()
            .map_err(|_| GuardError::Poisoned)?
            .insert(*entry, token);
        debug!(entry_id = %entry, "verification lock acquired");
        Ok(true)
    }

    async fn release(&self, entry: &EntryId) -> GuardResult<()> {
        let token = self
            .tokens
            .lock()
            .map_err(|_| GuardError::Poisoned)?
            .remove(entry);
        let Some(token) = token else {
            return Ok(());
        };

        let mut conn = self.redis.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(entry))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            warn!(entry_id = %entry, "verification lock expired before release");
        }
        Ok(())
    }
}
