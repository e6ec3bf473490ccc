//! Fail-closed verification of payment claims.
//!
//! The verifier never returns [`Verification::Valid`] unless every check
//! passed against data the ledger actually returned. Lookup trouble becomes
//! [`Verification::Pending`]; missing configuration becomes
//! [`Verification::Unavailable`]; a definite mismatch becomes
//! [`Verification::Invalid`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use raffle_types::{Currency, Entry, Raffle, TxSignature, WalletAddress};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::client::{fetch_with_retry, LedgerClient, RetryPolicy, UnconfiguredLedger};
use crate::config::VerifierConfig;
use crate::error::ChainError;
use crate::rpc::RpcLedgerClient;
use crate::transaction::LedgerTransaction;

/// Why a claim can never verify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The ledger recorded the transaction as failed.
    TransactionFailed,
    /// The transaction is older than the freshness window.
    Expired { age_secs: i64 },
    /// The fee payer is not the entry's wallet.
    SignerMismatch { expected: String, actual: Option<String> },
    /// The treasury received nothing in the expected asset.
    DestinationMissing,
    /// The transferred amount is outside tolerance.
    AmountMismatch { expected: i128, actual: i128 },
    /// The currency is not accepted by this deployment.
    UnsupportedCurrency(Currency),
    /// The entry's currency differs from its raffle's.
    CurrencyMismatch { entry: Currency, raffle: Currency },
    /// The entry carries an unusable amount.
    InvalidAmount(Decimal),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransactionFailed => write!(f, "transaction failed on-chain"),
            Self::Expired { age_secs } => write!(f, "transaction too old ({age_secs}s)"),
            Self::SignerMismatch { expected, actual } => write!(
                f,
                "fee payer {} does not match wallet {expected}",
                actual.as_deref().unwrap_or("<none>")
            ),
            Self::DestinationMissing => write!(f, "no transfer to the treasury"),
            Self::AmountMismatch { expected, actual } => {
                write!(f, "amount {actual} outside tolerance of {expected}")
            }
            Self::UnsupportedCurrency(c) => write!(f, "currency {c} not accepted"),
            Self::CurrencyMismatch { entry, raffle } => {
                write!(f, "entry currency {entry} differs from raffle currency {raffle}")
            }
            Self::InvalidAmount(a) => write!(f, "invalid claimed amount {a}"),
        }
    }
}

/// Outcome of verifying one claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Every check passed.
    Valid,
    /// Not decidable yet; the entry stays pending and may be retried.
    Pending { reason: String },
    /// The claim can never verify; the entry may be rejected.
    Invalid { reason: RejectReason },
    /// The verifier is not configured to decide anything.
    Unavailable { reason: String },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    fn pending(reason: impl Into<String>) -> Self {
        Self::Pending {
            reason: reason.into(),
        }
    }

    fn invalid(reason: RejectReason) -> Self {
        Self::Invalid { reason }
    }
}

impl From<ChainError> for Verification {
    fn from(e: ChainError) -> Self {
        if e.is_transient() {
            Self::pending(e.to_string())
        } else {
            Self::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

/// Checks claimed payments against the ledger.
pub struct TransactionVerifier {
    config: VerifierConfig,
    client: Arc<dyn LedgerClient>,
    retry: RetryPolicy,
}

impl TransactionVerifier {
    pub fn new(config: VerifierConfig, client: Arc<dyn LedgerClient>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            client,
            retry,
        }
    }

    /// Build with a JSON-RPC client for `config.rpc_url`.
    ///
    /// A missing or unusable endpoint still yields a verifier; it answers
    /// every claim with [`Verification::Unavailable`].
    pub fn from_config(config: VerifierConfig) -> Self {
        let client: Arc<dyn LedgerClient> = match config.rpc_url.as_deref() {
            Some(url) => match RpcLedgerClient::new(url, config.request_timeout()) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!(rpc_url = url, error = %e, "ledger endpoint unusable");
                    Arc::new(UnconfiguredLedger)
                }
            },
            None => {
                warn!("no ledger endpoint configured; verification will fail closed");
                Arc::new(UnconfiguredLedger)
            }
        };
        Self::new(config, client)
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    /// Verify `proof` as payment for `entry` in `raffle`, as of now.
    pub async fn verify(&self, proof: &TxSignature, entry: &Entry, raffle: &Raffle) -> Verification {
        self.verify_at(proof, entry, raffle, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        proof: &TxSignature,
        entry: &Entry,
        raffle: &Raffle,
        now: DateTime<Utc>,
    ) -> Verification {
        let outcome = self.check(proof, entry, raffle, now).await;
        match &outcome {
            Verification::Valid => {
                info!(entry_id = %entry.id, proof = proof.short(), "payment verified")
            }
            Verification::Pending { reason } => {
                debug!(entry_id = %entry.id, proof = proof.short(), reason = %reason, "verification pending")
            }
            Verification::Invalid { reason } => {
                warn!(entry_id = %entry.id, proof = proof.short(), %reason, "payment rejected")
            }
            Verification::Unavailable { reason } => {
                warn!(entry_id = %entry.id, proof = proof.short(), reason = %reason, "verification unavailable")
            }
        }
        outcome
    }

    async fn check(
        &self,
        proof: &TxSignature,
        entry: &Entry,
        raffle: &Raffle,
        now: DateTime<Utc>,
    ) -> Verification {
        if self.client.endpoint().is_none() {
            return ChainError::Misconfigured.into();
        }
        let Some(treasury) = self.treasury() else {
            return Verification::Unavailable {
                reason: "treasury wallet not configured".into(),
            };
        };

        if entry.currency != raffle.currency {
            return Verification::invalid(RejectReason::CurrencyMismatch {
                entry: entry.currency,
                raffle: raffle.currency,
            });
        }
        if !self.config.accepted_currencies.contains(&entry.currency) {
            return Verification::invalid(RejectReason::UnsupportedCurrency(entry.currency));
        }
        if entry.amount <= Decimal::ZERO {
            return Verification::invalid(RejectReason::InvalidAmount(entry.amount));
        }

        let tx = match fetch_with_retry(self.client.as_ref(), proof, self.config.commitment, &self.retry).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return Verification::pending("transaction not found"),
            Err(e) => return e.into(),
        };

        if tx.failed {
            return Verification::invalid(RejectReason::TransactionFailed);
        }

        let Some(block_time) = tx.block_time else {
            return Verification::pending("block time not yet available");
        };
        let age = now.signed_duration_since(block_time);
        if age.num_seconds() > self.config.max_transaction_age_secs as i64 {
            return Verification::invalid(RejectReason::Expired {
                age_secs: age.num_seconds(),
            });
        }

        if tx.fee_payer() != Some(entry.wallet.as_str()) {
            return Verification::invalid(RejectReason::SignerMismatch {
                expected: entry.wallet.to_string(),
                actual: tx.fee_payer().map(str::to_string),
            });
        }

        match entry.currency.mint() {
            None => self.check_native(&tx, &treasury, entry.amount, entry.currency),
            Some(mint) => self.check_token(&tx, &treasury, mint, entry.amount),
        }
    }

    fn treasury(&self) -> Option<WalletAddress> {
        let raw = self.config.treasury_wallet.as_deref()?;
        WalletAddress::parse(raw).ok()
    }

    fn check_native(
        &self,
        tx: &LedgerTransaction,
        treasury: &WalletAddress,
        amount: Decimal,
        currency: Currency,
    ) -> Verification {
        let Some(actual) = tx.native_delta(treasury.as_str()) else {
            return Verification::invalid(RejectReason::DestinationMissing);
        };
        let Ok(expected) = currency.base_units(amount) else {
            return Verification::invalid(RejectReason::InvalidAmount(amount));
        };
        within_tolerance(expected, actual, self.config.native_tolerance)
    }

    fn check_token(
        &self,
        tx: &LedgerTransaction,
        treasury: &WalletAddress,
        mint: &str,
        amount: Decimal,
    ) -> Verification {
        let Some(change) = tx.token_change(treasury.as_str(), mint) else {
            return Verification::invalid(RejectReason::DestinationMissing);
        };
        let Ok(expected) = Currency::to_base_units(amount, change.decimals) else {
            return Verification::invalid(RejectReason::InvalidAmount(amount));
        };
        // A change too large for i128 is reported saturated.
        let actual = change.delta().unwrap_or(if change.post > change.pre {
            i128::MAX
        } else {
            i128::MIN
        });
        within_tolerance(expected, actual, self.config.token_tolerance)
    }
}

fn within_tolerance(expected: i128, actual: i128, tolerance: u64) -> Verification {
    match actual.checked_sub(expected) {
        Some(diff) if diff.unsigned_abs() <= u128::from(tolerance) => Verification::Valid,
        _ => Verification::invalid(RejectReason::AmountMismatch { expected, actual }),
    }
}
