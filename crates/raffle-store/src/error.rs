use raffle_types::{EntryId, RaffleId, TxSignature};

/// Errors from raffle store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("raffle not found: {0}")]
    RaffleNotFound(RaffleId),

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("raffle already exists: {0}")]
    RaffleExists(RaffleId),

    #[error("entry already exists: {0}")]
    EntryExists(EntryId),

    /// The aggregate changed after the snapshot was read.
    #[error("version conflict on raffle {raffle}: expected {expected}, found {actual}")]
    VersionConflict {
        raffle: RaffleId,
        expected: u64,
        actual: u64,
    },

    /// The proof is already consumed by another entry.
    #[error("proof {proof} already consumed by entry {owner}")]
    ProofConsumed { proof: TxSignature, owner: EntryId },

    /// A commit referenced an entry outside the aggregate it targets.
    #[error("entry {entry} does not belong to raffle {raffle}")]
    ForeignEntry { entry: EntryId, raffle: RaffleId },

    #[error("store lock poisoned")]
    Poisoned,

    /// The durable backend failed or returned a row it could not decode.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
