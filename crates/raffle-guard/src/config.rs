use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Budget of `limit` requests per fixed window of `window_ms`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Where guard state lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GuardBackend {
    /// Process-local maps. Guarantees hold for one instance only.
    #[default]
    Memory,
    /// Shared Redis with atomic increment and set-if-absent.
    Redis { url: String },
}

/// Configuration for rate limits and verification locks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub backend: GuardBackend,
    /// Budget per client IP.
    pub ip: RateLimitConfig,
    /// Budget per wallet, tighter than the IP budget.
    pub wallet: RateLimitConfig,
    /// Expiry of a shared verification lock, so a crashed holder cannot
    /// block an entry forever.
    pub lock_ttl_ms: u64,
}

impl GuardConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            backend: GuardBackend::Memory,
            ip: RateLimitConfig::new(30, Duration::from_secs(60)),
            wallet: RateLimitConfig::new(10, Duration::from_secs(60)),
            lock_ttl_ms: 60_000,
        }
    }
}
