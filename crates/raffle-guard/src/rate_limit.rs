use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::{GuardError, GuardResult};

/// Outcome of a rate-limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

impl RateDecision {
    /// Whole seconds a rejected caller should wait, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            (secs + 1).max(1)
        } else {
            secs.max(1)
        }
    }
}

/// Fixed-window request budget keyed by an opaque identifier.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against `key` and report whether it is admitted.
    async fn check(&self, key: &str) -> GuardResult<RateDecision>;
}

/// Independent budgets a request is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Ip,
    Wallet,
}

impl Scope {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Wallet => "wallet",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One limiter per scope, so a noisy wallet cannot hide behind a shared IP
/// and a noisy IP cannot spread across wallets.
#[derive(Clone)]
pub struct RateLimits {
    ip: Arc<dyn RateLimiter>,
    wallet: Arc<dyn RateLimiter>,
}

impl RateLimits {
    pub fn new(ip: Arc<dyn RateLimiter>, wallet: Arc<dyn RateLimiter>) -> Self {
        Self { ip, wallet }
    }

    pub async fn check(&self, scope: Scope, key: &str) -> GuardResult<RateDecision> {
        let decision = match scope {
            Scope::Ip => self.ip.check(key).await?,
            Scope::Wallet => self.wallet.check(key).await?,
        };
        if !decision.allowed {
            debug!(%scope, key, retry_after = decision.retry_after_secs(), "rate limited");
        }
        Ok(decision)
    }
}

#[derive(Debug)]
struct FixedWindow {
    started: Instant,
    count: u32,
}

/// Process-local fixed-window limiter.
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, FixedWindow>>,
}

impl InMemoryRateLimiter {
    /// Windows kept before expired ones are swept out.
    const SWEEP_THRESHOLD: usize = 10_000;

    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check `key` as of `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> GuardResult<RateDecision> {
        let window = self.config.window();
        let mut windows = self.windows.lock().map_err(|_| GuardError::Poisoned)?;

        if windows.len() >= Self::SWEEP_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let slot = windows.entry(key.to_string()).or_insert(FixedWindow {
            started: now,
            count: 0,
        });
        if now.duration_since(slot.started) >= window {
            slot.started = now;
            slot.count = 0;
        }

        let reset_after = window.saturating_sub(now.duration_since(slot.started));
        if slot.count >= self.config.limit {
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                reset_after,
            });
        }

        slot.count += 1;
        Ok(RateDecision {
            allowed: true,
            remaining: self.config.limit - slot.count,
            reset_after,
        })
    }

    /// Number of tracked windows.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> GuardResult<RateDecision> {
        self.check_at(key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_ms: u64) -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(RateLimitConfig { limit, window_ms })
    }

    #[test]
    fn admits_up_to_limit() {
        let rl = limiter(3, 1_000);
        let now = Instant::now();
        let remaining: Vec<u32> = (0..3)
            .map(|_| rl.check_at("k", now).unwrap().remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);
        let denied = rl.check_at("k", now).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_after, Duration::from_millis(1_000));
    }

    #[test]
    fn window_resets() {
        let rl = limiter(1, 1_000);
        let now = Instant::now();
        assert!(rl.check_at("k", now).unwrap().allowed);
        assert!(!rl.check_at("k", now + Duration::from_millis(999)).unwrap().allowed);
        assert!(rl.check_at("k", now + Duration::from_millis(1_000)).unwrap().allowed);
    }

    #[test]
    fn keys_are_independent() {
        let rl = limiter(1, 60_000);
        let now = Instant::now();
        assert!(rl.check_at("a", now).unwrap().allowed);
        assert!(rl.check_at("b", now).unwrap().allowed);
        assert!(!rl.check_at("a", now).unwrap().allowed);
        assert_eq!(rl.tracked_keys(), 2);
    }

    #[test]
    fn retry_after_rounds_up() {
        let d = RateDecision {
            allowed: false,
            remaining: 0,
            reset_after: Duration::from_millis(1_200),
        };
        assert_eq!(d.retry_after_secs(), 2);
        let zero = RateDecision { reset_after: Duration::ZERO, ..d };
        assert_eq!(zero.retry_after_secs(), 1);
    }

    #[tokio::test]
    async fn scopes_have_separate_budgets() {
        let limits = RateLimits::new(Arc::new(limiter(5, 60_000)), Arc::new(limiter(1, 60_000)));
        assert!(limits.check(Scope::Wallet, "w1").await.unwrap().allowed);
        assert!(!limits.check(Scope::Wallet, "w1").await.unwrap().allowed);
        assert!(limits.check(Scope::Ip, "1.2.3.4").await.unwrap().allowed);
        assert!(limits.check(Scope::Wallet, "w2").await.unwrap().allowed);
    }
}
