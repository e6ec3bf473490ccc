use async_trait::async_trait;
use raffle_types::{Entry, EntryId, Raffle, RaffleId, TxSignature};

use crate::aggregate::{AggregateCommit, ClaimCursor, RaffleAggregate};
use crate::error::StoreResult;

/// Transactional store for raffle aggregates.
///
/// All implementations must satisfy these invariants:
/// - `commit` is atomic: every check passes and every write lands, or nothing
///   changes.
/// - `commit` fails with `VersionConflict` if the aggregate moved past
///   `expected_version`; callers re-read with `snapshot` and retry.
/// - A proof recorded through `commit` is owned by exactly one entry across
///   the whole store; a second owner fails with `ProofConsumed`.
/// - Entries are returned in creation order.
#[async_trait]
pub trait RaffleStore: Send + Sync {
    /// Register a new raffle aggregate.
    async fn insert_raffle(&self, raffle: &Raffle) -> StoreResult<()>;

    /// Add a new entry to its raffle. Bumps the aggregate version.
    async fn insert_entry(&self, entry: &Entry) -> StoreResult<()>;

    async fn raffle(&self, id: &RaffleId) -> StoreResult<Option<Raffle>>;

    async fn entry(&self, id: &EntryId) -> StoreResult<Option<Entry>>;

    /// Entries of a raffle in creation order.
    async fn entries(&self, raffle: &RaffleId) -> StoreResult<Vec<Entry>>;

    /// Read a consistent snapshot of the aggregate.
    ///
    /// Returns `Ok(None)` if the raffle does not exist.
    async fn snapshot(&self, raffle: &RaffleId) -> StoreResult<Option<RaffleAggregate>>;

    /// Apply a conditional write. Returns the new aggregate version.
    async fn commit(&self, commit: &AggregateCommit) -> StoreResult<u64>;

    /// Owner of a consumed proof anywhere in the store.
    async fn proof_owner(&self, proof: &TxSignature) -> StoreResult<Option<(RaffleId, EntryId)>>;

    /// Pending entries that carry a proof, ordered by [`ClaimCursor`].
    ///
    /// Returns at most `limit` claims positioned strictly after `after`, or
    /// from the start of the queue when `after` is `None`.
    async fn pending_claims(
        &self,
        after: Option<ClaimCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Entry>>;

    /// Entry lookup followed by a snapshot of its raffle.
    ///
    /// Default implementation chains `entry()` and `snapshot()`; backends may
    /// override to read both under one transaction.
    async fn snapshot_for_entry(&self, id: &EntryId) -> StoreResult<Option<RaffleAggregate>> {
        match self.entry(id).await? {
            Some(entry) => self.snapshot(&entry.raffle_id).await,
            None => Ok(None),
        }
    }
}
