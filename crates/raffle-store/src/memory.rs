//! In-memory raffle store for tests and single-instance deployments.
//!
//! [`InMemoryRaffleStore`] keeps every aggregate behind one `RwLock`, so a
//! commit's checks and writes run under the same exclusive guard. That is the
//! transactional isolation the capacity and double-spend checks rely on.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use raffle_types::{Entry, EntryId, Raffle, RaffleId, TxSignature};
use tracing::debug;

use crate::aggregate::{AggregateCommit, ClaimCursor, RaffleAggregate};
use crate::error::{StoreError, StoreResult};
use crate::traits::RaffleStore;

#[derive(Default)]
struct StoreState {
    aggregates: HashMap<RaffleId, RaffleAggregate>,
    entry_index: HashMap<EntryId, RaffleId>,
    proof_index: HashMap<TxSignature, (RaffleId, EntryId)>,
}

impl StoreState {
    fn validate(&self, commit: &AggregateCommit) -> StoreResult<&RaffleAggregate> {
        let aggregate = self
            .aggregates
            .get(&commit.raffle_id)
            .ok_or(StoreError::RaffleNotFound(commit.raffle_id))?;

        if aggregate.version != commit.expected_version {
            return Err(StoreError::VersionConflict {
                raffle: commit.raffle_id,
                expected: commit.expected_version,
                actual: aggregate.version,
            });
        }

        if let Some(raffle) = &commit.raffle {
            if raffle.id != commit.raffle_id {
                return Err(StoreError::RaffleNotFound(raffle.id));
            }
        }

        let owned = |entry: &EntryId| -> StoreResult<()> {
            match self.entry_index.get(entry) {
                Some(raffle) if *raffle == commit.raffle_id => Ok(()),
                Some(_) => Err(StoreError::ForeignEntry {
                    entry: *entry,
                    raffle: commit.raffle_id,
                }),
                None => Err(StoreError::EntryNotFound(*entry)),
            }
        };

        for entry in &commit.entries {
            owned(&entry.id)?;
            if entry.raffle_id != commit.raffle_id {
                return Err(StoreError::ForeignEntry {
                    entry: entry.id,
                    raffle: commit.raffle_id,
                });
            }
        }

        for (proof, entry) in &commit.consume {
            owned(entry)?;
            if let Some((_, owner)) = self.proof_index.get(proof) {
                if owner != entry {
                    return Err(StoreError::ProofConsumed {
                        proof: proof.clone(),
                        owner: *owner,
                    });
                }
            }
        }

        Ok(aggregate)
    }
}

/// An in-memory implementation of [`RaffleStore`].
///
/// Data is lost when the store is dropped.
#[derive(Default)]
pub struct InMemoryRaffleStore {
    inner: RwLock<StoreState>,
}

impl InMemoryRaffleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    /// Number of raffles held.
    pub fn raffle_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.aggregates.len())
    }
}

#[async_trait]
impl RaffleStore for InMemoryRaffleStore {
    async fn insert_raffle(&self, raffle: &Raffle) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.aggregates.contains_key(&raffle.id) {
            return Err(StoreError::RaffleExists(raffle.id));
        }
        state
            .aggregates
            .insert(raffle.id, RaffleAggregate::new(raffle.clone()));
        Ok(())
    }

    async fn insert_entry(&self, entry: &Entry) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.entry_index.contains_key(&entry.id) {
            return Err(StoreError::EntryExists(entry.id));
        }
        let aggregate = state
            .aggregates
            .get_mut(&entry.raffle_id)
            .ok_or(StoreError::RaffleNotFound(entry.raffle_id))?;
        aggregate.entries.push(entry.clone());
        aggregate.version += 1;
        state.entry_index.insert(entry.id, entry.raffle_id);
        Ok(())
    }

    async fn raffle(&self, id: &RaffleId) -> StoreResult<Option<Raffle>> {
        Ok(self.read()?.aggregates.get(id).map(|a| a.raffle.clone()))
    }

    async fn entry(&self, id: &EntryId) -> StoreResult<Option<Entry>> {
        let state = self.read()?;
        Ok(state
            .entry_index
            .get(id)
            .and_then(|raffle| state.aggregates.get(raffle))
            .and_then(|a| a.entry(id))
            .cloned())
    }

    async fn entries(&self, raffle: &RaffleId) -> StoreResult<Vec<Entry>> {
        let state = self.read()?;
        let aggregate = state
            .aggregates
            .get(raffle)
            .ok_or(StoreError::RaffleNotFound(*raffle))?;
        Ok(aggregate.entries.clone())
    }

    async fn snapshot(&self, raffle: &RaffleId) -> StoreResult<Option<RaffleAggregate>> {
        Ok(self.read()?.aggregates.get(raffle).cloned())
    }

    async fn commit(&self, commit: &AggregateCommit) -> StoreResult<u64> {
        let mut state = self.write()?;
        state.validate(commit)?;

        for (proof, entry) in &commit.consume {
            state
                .proof_index
                .insert(proof.clone(), (commit.raffle_id, *entry));
        }

        let aggregate = state
            .aggregates
            .get_mut(&commit.raffle_id)
            .ok_or(StoreError::RaffleNotFound(commit.raffle_id))?;

        if let Some(raffle) = &commit.raffle {
            aggregate.raffle = raffle.clone();
        }
        for update in &commit.entries {
            if let Some(slot) = aggregate.entries.iter_mut().find(|e| e.id == update.id) {
                *slot = update.clone();
            }
        }
        for (proof, entry) in &commit.consume {
            aggregate.consumed.insert(proof.clone(), *entry);
        }
        aggregate.version += 1;

        debug!(
            raffle_id = %commit.raffle_id,
            version = aggregate.version,
            entries = commit.entries.len(),
            consumed = commit.consume.len(),
            "aggregate committed"
        );
        Ok(aggregate.version)
    }

    async fn proof_owner(&self, proof: &TxSignature) -> StoreResult<Option<(RaffleId, EntryId)>> {
        Ok(self.read()?.proof_index.get(proof).copied())
    }

    async fn pending_claims(
        &self,
        after: Option<ClaimCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Entry>> {
        let state = self.read()?;
        let mut pending: Vec<(ClaimCursor, &Entry)> = state
            .aggregates
            .values()
            .flat_map(|a| a.entries.iter())
            .filter(|e| e.is_pending() && e.proof.is_some())
            .map(|e| (ClaimCursor::of(e), e))
            .filter(|(cursor, _)| after.map_or(true, |after| *cursor > after))
            .collect();
        pending.sort_by_key(|(cursor, _)| *cursor);
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use raffle_types::{Currency, EntryStatus, WalletAddress};
    use rust_decimal::Decimal;

    fn wallet(c: char) -> WalletAddress {
        WalletAddress::from_bytes([c as u8; 32])
    }

    fn proof(c: char) -> TxSignature {
        TxSignature::from_bytes([c as u8; 64])
    }

    async fn seeded() -> (InMemoryRaffleStore, Raffle, Entry) {
        let store = InMemoryRaffleStore::new();
        let now = Utc::now();
        let raffle = Raffle::new("r", Decimal::ONE, Currency::Sol, now, now + Duration::days(1));
        store.insert_raffle(&raffle).await.unwrap();
        let entry = Entry::new(&raffle, wallet('A'), 2, now).unwrap();
        store.insert_entry(&entry).await.unwrap();
        (store, raffle, entry)
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let (store, raffle, entry) = seeded().await;
        assert_eq!(store.raffle(&raffle.id).await.unwrap(), Some(raffle.clone()));
        assert_eq!(store.entry(&entry.id).await.unwrap(), Some(entry.clone()));
        assert_eq!(store.entries(&raffle.id).await.unwrap(), vec![entry]);
        assert_eq!(store.raffle_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_raffle_rejected() {
        let (store, raffle, _) = seeded().await;
        assert_eq!(store.insert_raffle(&raffle).await, Err(StoreError::RaffleExists(raffle.id)));
    }

    #[tokio::test]
    async fn entry_for_unknown_raffle_rejected() {
        let (store, raffle, _) = seeded().await;
        let mut orphan = Entry::new(&raffle, wallet('B'), 1, Utc::now()).unwrap();
        orphan.raffle_id = RaffleId::new();
        assert!(matches!(store.insert_entry(&orphan).await, Err(StoreError::RaffleNotFound(_))));
    }

    #[tokio::test]
    async fn insert_entry_bumps_version() {
        let (store, raffle, _) = seeded().await;
        assert_eq!(store.snapshot(&raffle.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn commit_applies_and_bumps_version() {
        let (store, raffle, entry) = seeded().await;
        let snapshot = store.snapshot(&raffle.id).await.unwrap().unwrap();
        let mut confirmed = entry.clone();
        confirmed.status = EntryStatus::Confirmed;
        confirmed.proof = Some(proof('P'));
        let commit = AggregateCommit::on(&snapshot)
            .update_entry(confirmed.clone())
            .consume(proof('P'), entry.id);
        assert_eq!(store.commit(&commit).await.unwrap(), 2);

        let after = store.snapshot(&raffle.id).await.unwrap().unwrap();
        assert_eq!(after.confirmed_tickets(), 2);
        assert_eq!(after.proof_owner(&proof('P')), Some(entry.id));
        assert_eq!(store.proof_owner(&proof('P')).await.unwrap(), Some((raffle.id, entry.id)));
    }

    #[tokio::test]
    async fn stale_snapshot_conflicts() {
        let (store, raffle, entry) = seeded().await;
        let snapshot = store.snapshot(&raffle.id).await.unwrap().unwrap();
        store
            .insert_entry(&Entry::new(&raffle, wallet('B'), 1, Utc::now()).unwrap())
            .await
            .unwrap();
        let commit = AggregateCommit::on(&snapshot).update_entry(entry);
        assert!(matches!(
            store.commit(&commit).await,
            Err(StoreError::VersionConflict { expected: 1, actual: 2, .. })
        ));
    }

    #[tokio::test]
    async fn proof_cannot_move_between_entries() {
        let (store, raffle, first) = seeded().await;
        let second = Entry::new(&raffle, wallet('B'), 1, Utc::now()).unwrap();
        store.insert_entry(&second).await.unwrap();

        let snap = store.snapshot(&raffle.id).await.unwrap().unwrap();
        store
            .commit(&AggregateCommit::on(&snap).consume(proof('Q'), first.id))
            .await
            .unwrap();

        let snap = store.snapshot(&raffle.id).await.unwrap().unwrap();
        let err = store
            .commit(&AggregateCommit::on(&snap).consume(proof('Q'), second.id))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::ProofConsumed { proof: proof('Q'), owner: first.id });
    }

    #[tokio::test]
    async fn proof_unique_across_raffles() {
        let (store, raffle, first) = seeded().await;
        let other = Raffle::new("o", Decimal::ONE, Currency::Sol, Utc::now(), Utc::now() + Duration::days(1));
        store.insert_raffle(&other).await.unwrap();
        let foreign = Entry::new(&other, wallet('C'), 1, Utc::now()).unwrap();
        store.insert_entry(&foreign).await.unwrap();

        let snap = store.snapshot(&raffle.id).await.unwrap().unwrap();
        store
            .commit(&AggregateCommit::on(&snap).consume(proof('R'), first.id))
            .await
            .unwrap();

        let snap = store.snapshot(&other.id).await.unwrap().unwrap();
        assert!(matches!(
            store.commit(&AggregateCommit::on(&snap).consume(proof('R'), foreign.id)).await,
            Err(StoreError::ProofConsumed { .. })
        ));
    }

    #[tokio::test]
    async fn failed_commit_writes_nothing() {
        let (store, raffle, entry) = seeded().await;
        let snap = store.snapshot(&raffle.id).await.unwrap().unwrap();
        let mut changed = entry.clone();
        changed.status = EntryStatus::Rejected;
        let commit = AggregateCommit::on(&snap)
            .update_entry(changed)
            .consume(proof('S'), EntryId::new());
        assert!(matches!(store.commit(&commit).await, Err(StoreError::EntryNotFound(_))));
        assert_eq!(store.entry(&entry.id).await.unwrap().unwrap().status, EntryStatus::Pending);
        assert_eq!(store.snapshot(&raffle.id).await.unwrap().unwrap().version, snap.version);
    }

    #[tokio::test]
    async fn foreign_entry_rejected() {
        let (store, raffle, _) = seeded().await;
        let other = Raffle::new("o", Decimal::ONE, Currency::Sol, Utc::now(), Utc::now() + Duration::days(1));
        store.insert_raffle(&other).await.unwrap();
        let foreign = Entry::new(&other, wallet('C'), 1, Utc::now()).unwrap();
        store.insert_entry(&foreign).await.unwrap();

        let snap = store.snapshot(&raffle.id).await.unwrap().unwrap();
        assert!(matches!(
            store.commit(&AggregateCommit::on(&snap).update_entry(foreign)).await,
            Err(StoreError::ForeignEntry { .. })
        ));
    }

    #[tokio::test]
    async fn pending_claims_filters_and_orders_by_claim_time() {
        let (store, raffle, first) = seeded().await;
        let now = Utc::now();
        // Created long ago but claimed recently.
        let mut late = Entry::new(&raffle, wallet('B'), 1, now - Duration::hours(3)).unwrap();
        late.proof = Some(proof('T'));
        late.claimed_at = Some(now);
        store.insert_entry(&late).await.unwrap();

        let snap = store.snapshot(&raffle.id).await.unwrap().unwrap();
        let mut early = first.clone();
        early.proof = Some(proof('U'));
        early.claimed_at = Some(now - Duration::minutes(5));
        store
            .commit(&AggregateCommit::on(&snap).update_entry(early.clone()))
            .await
            .unwrap();

        let unclaimed = Entry::new(&raffle, wallet('C'), 1, now).unwrap();
        store.insert_entry(&unclaimed).await.unwrap();

        let pending = store.pending_claims(None, 10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert_eq!(store.pending_claims(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_claims_resume_after_cursor() {
        let (store, raffle, _) = seeded().await;
        let base = Utc::now() - Duration::hours(1);
        let mut claims = Vec::new();
        for (i, c) in ['D', 'E', 'F', 'G'].into_iter().enumerate() {
            let mut e = Entry::new(&raffle, wallet(c), 1, base).unwrap();
            e.proof = Some(proof(c));
            e.claimed_at = Some(base + Duration::seconds(i as i64));
            store.insert_entry(&e).await.unwrap();
            claims.push(e);
        }

        let page = store.pending_claims(None, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        let cursor = page.last().map(ClaimCursor::of);
        let rest = store.pending_claims(cursor, 2).await.unwrap();
        let ids: Vec<_> = rest.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![claims[2].id, claims[3].id]);

        let past_end = store.pending_claims(rest.last().map(ClaimCursor::of), 2).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn snapshot_for_entry_follows_raffle() {
        let (store, raffle, entry) = seeded().await;
        let snap = store.snapshot_for_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(snap.id(), raffle.id);
        assert!(store.snapshot_for_entry(&EntryId::new()).await.unwrap().is_none());
    }
}
