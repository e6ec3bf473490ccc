use raffle_store::StoreError;
use raffle_types::{EntryId, EntryStatus, RaffleId, TxSignature};

/// Errors from the confirmation primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmError {
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("raffle not found: {0}")]
    RaffleNotFound(RaffleId),

    /// The proof is consumed by a different entry.
    #[error("proof {proof} already used by entry {owner}")]
    ProofUsed { proof: TxSignature, owner: EntryId },

    /// The entry is no longer pending, or carries a different proof.
    #[error("entry {entry} is {status}; cannot transition")]
    InvalidState { entry: EntryId, status: EntryStatus },

    #[error("insufficient tickets remaining: requested {requested}, remaining {remaining}")]
    InsufficientTickets { requested: u32, remaining: u64 },

    /// The request disagrees with the stored entry.
    #[error("request does not match entry {entry}: {field}")]
    Mismatch { entry: EntryId, field: &'static str },

    #[error("aggregate still contended after {0} attempts")]
    Contention(u32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConfirmError {
    /// Conflicts are definite answers about this request, not faults.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ProofUsed { .. }
                | Self::InvalidState { .. }
                | Self::InsufficientTickets { .. }
                | Self::Mismatch { .. }
        )
    }
}

pub type ConfirmResult<T> = Result<T, ConfirmError>;

/// Errors from winner selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrawError {
    #[error("raffle not found: {0}")]
    RaffleNotFound(RaffleId),

    #[error("aggregate still contended after {0} attempts")]
    Contention(u32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type DrawResult<T> = Result<T, DrawError>;
