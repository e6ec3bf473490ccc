//! Ledger access and payment verification.
//!
//! This crate answers one question: does a claimed transaction signature
//! prove that an entry's wallet paid the raffle treasury the right amount,
//! recently enough? The answer is always one of valid, transient (ask again
//! later), invalid (never valid), or unavailable (we cannot check right now).
//!
//! - [`LedgerClient`] -- transaction lookup boundary, with [`RpcLedgerClient`]
//!   for JSON-RPC nodes and [`InMemoryLedgerClient`] for tests
//! - [`fetch_with_retry`] -- bounded retry for lagging nodes
//! - [`TransactionVerifier`] -- the fail-closed claim checks
//!
//! Raw RPC payloads are decoded into [`LedgerTransaction`] at the boundary;
//! nothing downstream sees untyped JSON.

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod rpc;
pub mod transaction;
pub mod verifier;

pub use client::{fetch_with_retry, LedgerClient, RetryPolicy, UnconfiguredLedger};
pub use config::{Commitment, VerifierConfig};
pub use error::{ChainError, ChainResult};
pub use memory::InMemoryLedgerClient;
pub use rpc::RpcLedgerClient;
pub use transaction::{LedgerTransaction, TokenBalanceChange};
pub use verifier::{RejectReason, TransactionVerifier, Verification};
