//! In-memory ledger for tests and local demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use raffle_types::TxSignature;

use crate::client::LedgerClient;
use crate::config::Commitment;
use crate::error::{ChainError, ChainResult};
use crate::transaction::LedgerTransaction;

struct Listed {
    tx: LedgerTransaction,
    /// Lookups that still answer "not found" before the transaction appears.
    hidden_for: u32,
}

/// A programmable [`LedgerClient`].
///
/// Transactions can be made to appear only after a number of lookups (to
/// model node lag), and upcoming lookups can be forced to time out.
#[derive(Default)]
pub struct InMemoryLedgerClient {
    transactions: RwLock<HashMap<TxSignature, Listed>>,
    failures: AtomicU32,
    calls: AtomicUsize,
}

impl InMemoryLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx: LedgerTransaction) {
        self.insert_visible_after(tx, 0);
    }

    /// Insert a transaction that stays invisible for the next `lookups` lookups.
    pub fn insert_visible_after(&self, tx: LedgerTransaction, lookups: u32) {
        if let Ok(mut txs) = self.transactions.write() {
            txs.insert(
                tx.signature.clone(),
                Listed {
                    tx,
                    hidden_for: lookups,
                },
            );
        }
    }

    /// Make the next `n` lookups fail with a timeout.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Total lookups served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedgerClient {
    fn endpoint(&self) -> Option<&str> {
        Some("memory://ledger")
    }

    async fn get_transaction(
        &self,
        signature: &TxSignature,
        _commitment: Commitment,
    ) -> ChainResult<Option<LedgerTransaction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::Timeout);
        }

        let mut txs = self
            .transactions
            .write()
            .map_err(|_| ChainError::Transport("ledger state poisoned".into()))?;
        match txs.get_mut(signature) {
            Some(listed) if listed.hidden_for > 0 => {
                listed.hidden_for -= 1;
                Ok(None)
            }
            Some(listed) => Ok(Some(listed.tx.clone())),
            None => Ok(None),
        }
    }
}
