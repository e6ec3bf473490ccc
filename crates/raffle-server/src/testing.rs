//! Shared fixtures for pipeline, sweep, and endpoint tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use raffle_chain::{InMemoryLedgerClient, LedgerTransaction, RetryPolicy, TransactionVerifier, VerifierConfig};
use raffle_guard::{Guards, InMemoryVerificationLock, RateLimitConfig, VerificationLock};
use raffle_store::{InMemoryRaffleStore, RaffleStore};
use raffle_types::{Currency, Entry, Raffle, TxSignature, WalletAddress};
use rust_decimal::Decimal;

use crate::config::AppConfig;
use crate::pipeline::ConfirmationPipeline;
use crate::state::AppState;

/// Base58 of 32 repeated `T` bytes.
pub const TREASURY: &str = "6gBq2J7rg3x2ic1de6QBSXq5WLfuaLfswGz7tvmKkz6P";
/// Base58 of 32 repeated `P` bytes.
pub const PAYER: &str = "6QWeT6FpJrm8AF1btu6WH2k2Xhq6t5vbheKVfQavmeoZ";
pub const ADMIN_TOKEN: &str = "test-admin-token";

pub fn proof(c: char) -> TxSignature {
    TxSignature::from_bytes([c as u8; 64])
}

pub fn payer() -> WalletAddress {
    WalletAddress::parse(PAYER).unwrap()
}

pub fn verifier_config() -> VerifierConfig {
    VerifierConfig {
        rpc_url: Some("http://localhost:8899".into()),
        treasury_wallet: Some(TREASURY.into()),
        ..VerifierConfig::default()
    }
}

/// One open SOL raffle at 0.1 per ticket, backed by in-memory everything.
pub struct Fixture {
    pub store: Arc<InMemoryRaffleStore>,
    pub ledger: Arc<InMemoryLedgerClient>,
    pub lock: Arc<InMemoryVerificationLock>,
    pub pipeline: Arc<ConfirmationPipeline>,
    pub raffle: Raffle,
    pub config: AppConfig,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_cap(None).await
    }

    pub async fn with_cap(max_tickets: Option<u32>) -> Self {
        Self::build(max_tickets, verifier_config()).await
    }

    /// No ledger endpoint and no treasury.
    pub async fn unconfigured() -> Self {
        Self::build(None, VerifierConfig::default()).await
    }

    async fn build(max_tickets: Option<u32>, verifier: VerifierConfig) -> Self {
        let store = Arc::new(InMemoryRaffleStore::new());
        let now = Utc::now();
        let mut raffle = Raffle::new(
            "fixture",
            Decimal::new(1, 1),
            Currency::Sol,
            now - Duration::days(1),
            now + Duration::days(1),
        );
        raffle.max_tickets = max_tickets;
        store.insert_raffle(&raffle).await.unwrap();

        let mut config = AppConfig::default();
        config.verifier = verifier;
        config.server.admin_token = Some(ADMIN_TOKEN.into());
        config.limits.wallet = RateLimitConfig::new(1_000, std::time::Duration::from_secs(60));
        config.limits.ip = RateLimitConfig::new(1_000, std::time::Duration::from_secs(60));

        let ledger = Arc::new(InMemoryLedgerClient::new());
        let lock = Arc::new(InMemoryVerificationLock::new());
        let pipeline = Arc::new(ConfirmationPipeline::new(
            store.clone(),
            Self::verifier(&config, &ledger),
            lock.clone(),
        ));

        Self {
            store,
            ledger,
            lock,
            pipeline,
            raffle,
            config,
        }
    }

    fn verifier(config: &AppConfig, ledger: &Arc<InMemoryLedgerClient>) -> TransactionVerifier {
        TransactionVerifier::new(config.verifier.clone(), ledger.clone()).with_retry(RetryPolicy::immediate(0))
    }

    /// A pending entry from [`PAYER`].
    pub async fn entry(&self, quantity: u32) -> Entry {
        self.entry_at(quantity, Utc::now()).await
    }

    /// A pending entry from [`PAYER`] created at `created_at`.
    pub async fn entry_at(&self, quantity: u32, created_at: DateTime<Utc>) -> Entry {
        let entry = Entry::new(&self.raffle, payer(), quantity, created_at).unwrap();
        self.store.insert_entry(&entry).await.unwrap();
        entry
    }

    /// Put an exact payment for `entry` on the ledger.
    pub fn pay(&self, entry: &Entry, proof: TxSignature) {
        let lamports = Currency::Sol.base_units(entry.amount).unwrap() as u64;
        self.pay_lamports(entry, proof, lamports);
    }

    pub fn pay_lamports(&self, entry: &Entry, proof: TxSignature, lamports: u64) {
        self.ledger.insert(
            LedgerTransaction::new(proof, entry.wallet.as_str()).with_native_transfer(TREASURY, lamports),
        );
    }

    /// Exact payment landing in a block at `at`.
    pub fn pay_at(&self, entry: &Entry, proof: TxSignature, at: DateTime<Utc>) {
        let lamports = Currency::Sol.base_units(entry.amount).unwrap() as u64;
        self.ledger.insert(
            LedgerTransaction::new(proof, entry.wallet.as_str())
                .with_native_transfer(TREASURY, lamports)
                .with_block_time(Some(at)),
        );
    }

    pub async fn lock_entry(&self, entry: &Entry) {
        assert!(self.lock.try_acquire(&entry.id).await.unwrap());
    }

    /// Handler state sharing this fixture's store, ledger, and lock.
    pub fn state(&self) -> AppState {
        self.state_with(|_| {})
    }

    pub fn state_with(&self, tweak: impl FnOnce(&mut AppConfig)) -> AppState {
        let mut config = self.config.clone();
        tweak(&mut config);
        let mut guards = Guards::in_memory(&config.limits);
        guards.lock = self.lock.clone();
        let verifier = Self::verifier(&config, &self.ledger);
        AppState::new(config, self.store.clone(), verifier, guards)
    }
}
