use std::time::Duration;

use raffle_types::Currency;
use serde::{Deserialize, Serialize};

/// Ledger commitment level used for lookups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// Configuration for ledger access and claim verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// JSON-RPC endpoint. Verification fails closed when unset.
    pub rpc_url: Option<String>,
    /// Wallet that must receive payments. Verification fails closed when unset.
    pub treasury_wallet: Option<String>,
    pub commitment: Commitment,
    /// Upper bound on a single ledger request.
    pub request_timeout_ms: u64,
    /// Extra lookups after the first "not found" or error.
    pub max_retries: u32,
    /// Base delay between lookups; attempt `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    /// Transactions older than this are refused.
    pub max_transaction_age_secs: u64,
    /// Accepted absolute deviation for native payments, in lamports.
    pub native_tolerance: u64,
    /// Accepted absolute deviation for token payments, in raw token units.
    pub token_tolerance: u64,
    pub accepted_currencies: Vec<Currency>,
}

impl VerifierConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_transaction_age(&self) -> Duration {
        Duration::from_secs(self.max_transaction_age_secs)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            treasury_wallet: None,
            commitment: Commitment::Confirmed,
            request_timeout_ms: 10_000,
            max_retries: 2,
            retry_delay_ms: 1_000,
            max_transaction_age_secs: 3_600,
            // 0.001 SOL
            native_tolerance: 1_000_000,
            token_tolerance: 1,
            accepted_currencies: vec![Currency::Sol, Currency::Usdc],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_closed() {
        let c = VerifierConfig::default();
        assert!(c.rpc_url.is_none());
        assert!(c.treasury_wallet.is_none());
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.max_transaction_age(), Duration::from_secs(3600));
        assert_eq!(c.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn commitment_serializes_lowercase() {
        assert_eq!(Commitment::Finalized.as_str(), "finalized");
        let c: Commitment = serde_json::from_str("\"confirmed\"").unwrap();
        assert_eq!(c, Commitment::Confirmed);
    }
}
