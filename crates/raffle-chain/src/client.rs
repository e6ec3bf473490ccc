use std::time::Duration;

use async_trait::async_trait;
use raffle_types::TxSignature;
use tracing::{debug, warn};

use crate::config::{Commitment, VerifierConfig};
use crate::error::{ChainError, ChainResult};
use crate::transaction::LedgerTransaction;

/// Transaction lookup against an external ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Where lookups go, for diagnostics. `None` means no usable endpoint.
    fn endpoint(&self) -> Option<&str>;

    /// Fetch a transaction by signature.
    ///
    /// Returns `Ok(None)` if the ledger does not (yet) know the signature.
    async fn get_transaction(
        &self,
        signature: &TxSignature,
        commitment: Commitment,
    ) -> ChainResult<Option<LedgerTransaction>>;
}

/// Ledger client used when no endpoint is configured. Every lookup fails.
pub struct UnconfiguredLedger;

#[async_trait]
impl LedgerClient for UnconfiguredLedger {
    fn endpoint(&self) -> Option<&str> {
        None
    }

    async fn get_transaction(
        &self,
        _signature: &TxSignature,
        _commitment: Commitment,
    ) -> ChainResult<Option<LedgerTransaction>> {
        Err(ChainError::Misconfigured)
    }
}

/// Bounded retry schedule for lookups against lagging nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &VerifierConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.delay * attempt
    }
}

/// Look up `signature`, retrying "not found" and errors up to
/// `policy.max_retries` times with a linearly growing delay.
///
/// Returns the first transaction found; otherwise the outcome of the last
/// attempt. A missing endpoint is not retried.
pub async fn fetch_with_retry(
    client: &dyn LedgerClient,
    signature: &TxSignature,
    commitment: Commitment,
    policy: &RetryPolicy,
) -> ChainResult<Option<LedgerTransaction>> {
    let mut last = Ok(None);
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_before(attempt)).await;
        }
        match client.get_transaction(signature, commitment).await {
            Ok(Some(tx)) => return Ok(Some(tx)),
            Ok(None) => {
                debug!(proof = signature.short(), attempt, "transaction not found yet");
                last = Ok(None);
            }
            Err(ChainError::Misconfigured) => return Err(ChainError::Misconfigured),
            Err(e) => {
                warn!(proof = signature.short(), attempt, error = %e, "ledger lookup failed");
                last = Err(e);
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedgerClient;

    fn sig() -> TxSignature {
        TxSignature::from_bytes([0x5a; 64])
    }

    #[tokio::test]
    async fn finds_on_first_attempt() {
        let ledger = InMemoryLedgerClient::new();
        ledger.insert(LedgerTransaction::new(sig(), "payer"));
        let tx = fetch_with_retry(&ledger, &sig(), Commitment::Confirmed, &RetryPolicy::immediate(2))
            .await
            .unwrap();
        assert!(tx.is_some());
        assert_eq!(ledger.calls(), 1);
    }

    #[tokio::test]
    async fn not_found_uses_all_attempts() {
        let ledger = InMemoryLedgerClient::new();
        let tx = fetch_with_retry(&ledger, &sig(), Commitment::Confirmed, &RetryPolicy::immediate(2))
            .await
            .unwrap();
        assert!(tx.is_none());
        assert_eq!(ledger.calls(), 3);
    }

    #[tokio::test]
    async fn lagging_node_found_on_retry() {
        let ledger = InMemoryLedgerClient::new();
        ledger.insert_visible_after(LedgerTransaction::new(sig(), "payer"), 2);
        let tx = fetch_with_retry(&ledger, &sig(), Commitment::Confirmed, &RetryPolicy::immediate(2))
            .await
            .unwrap();
        assert!(tx.is_some());
        assert_eq!(ledger.calls(), 3);
    }

    #[tokio::test]
    async fn errors_surface_after_retries() {
        let ledger = InMemoryLedgerClient::new();
        ledger.fail_next(5);
        let err = fetch_with_retry(&ledger, &sig(), Commitment::Confirmed, &RetryPolicy::immediate(1))
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::Timeout);
        assert_eq!(ledger.calls(), 2);
    }

    #[tokio::test]
    async fn unconfigured_is_not_retried() {
        let err = fetch_with_retry(&UnconfiguredLedger, &sig(), Commitment::Confirmed, &RetryPolicy::immediate(3))
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::Misconfigured);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_grow_linearly() {
        let ledger = InMemoryLedgerClient::new();
        let policy = RetryPolicy {
            max_retries: 2,
            delay: Duration::from_millis(100),
        };
        let start = tokio::time::Instant::now();
        fetch_with_retry(&ledger, &sig(), Commitment::Confirmed, &policy)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
