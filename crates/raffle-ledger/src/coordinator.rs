//! The atomic confirmation primitive.
//!
//! Each operation reads a versioned snapshot, plans a commit against it with
//! a pure function, and hands the commit to the store. A version conflict
//! means another writer got there first: the snapshot is re-read and the
//! plan re-evaluated, so every check always runs against the state the write
//! actually lands on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use raffle_store::{AggregateCommit, RaffleAggregate, RaffleStore, StoreError};
use raffle_types::{Entry, EntryId, EntryStatus, RaffleId, TxSignature, WalletAddress};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::{ConfirmError, ConfirmResult};
use crate::DEFAULT_MAX_ATTEMPTS;

/// A verified payment to commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub entry_id: EntryId,
    pub raffle_id: RaffleId,
    pub wallet: WalletAddress,
    pub proof: TxSignature,
    pub amount: Decimal,
    pub ticket_quantity: u32,
}

impl ConfirmRequest {
    /// Request confirming `entry` as it is stored, paid by `proof`.
    pub fn for_entry(entry: &Entry, proof: TxSignature) -> Self {
        Self {
            entry_id: entry.id,
            raffle_id: entry.raffle_id,
            wallet: entry.wallet.clone(),
            proof,
            amount: entry.amount,
            ticket_quantity: entry.ticket_quantity,
        }
    }
}

/// Successful outcome of [`ConfirmationCoordinator::confirm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// This call moved the entry to confirmed.
    Confirmed(Entry),
    /// The entry was already confirmed with the same proof; nothing written.
    AlreadyConfirmed(Entry),
}

impl Confirmation {
    pub fn entry(&self) -> &Entry {
        match self {
            Self::Confirmed(e) | Self::AlreadyConfirmed(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// What a confirmation would do to a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationPlan {
    /// Idempotent replay; nothing to write.
    Noop(Entry),
    /// Apply `commit`, producing `entry`.
    Commit {
        commit: AggregateCommit,
        entry: Entry,
    },
}

/// Plan confirming `req` against `snapshot`.
///
/// Checks run in a fixed order: idempotency, double-spend, state, request
/// consistency, then capacity.
pub fn plan_confirmation(
    snapshot: &RaffleAggregate,
    req: &ConfirmRequest,
    now: DateTime<Utc>,
) -> ConfirmResult<ConfirmationPlan> {
    let entry = snapshot
        .entry(&req.entry_id)
        .ok_or(ConfirmError::EntryNotFound(req.entry_id))?;

    if entry.is_confirmed_with(&req.proof) {
        return Ok(ConfirmationPlan::Noop(entry.clone()));
    }

    if let Some(owner) = snapshot.proof_owner(&req.proof) {
        if owner != entry.id {
            return Err(ConfirmError::ProofUsed {
                proof: req.proof.clone(),
                owner,
            });
        }
    }

    if !entry.is_pending() {
        return Err(ConfirmError::InvalidState {
            entry: entry.id,
            status: entry.status,
        });
    }

    let mismatch = |field| ConfirmError::Mismatch {
        entry: entry.id,
        field,
    };
    if entry.wallet != req.wallet {
        return Err(mismatch("wallet"));
    }
    if entry.ticket_quantity != req.ticket_quantity {
        return Err(mismatch("ticket quantity"));
    }
    if entry.amount != req.amount {
        return Err(mismatch("amount"));
    }

    if let Some(remaining) = snapshot
        .raffle
        .remaining_tickets(snapshot.confirmed_tickets())
    {
        if u64::from(entry.ticket_quantity) > remaining {
            return Err(ConfirmError::InsufficientTickets {
                requested: entry.ticket_quantity,
                remaining,
            });
        }
    }

    let mut confirmed = entry.clone();
    confirmed.status = EntryStatus::Confirmed;
    confirmed.proof = Some(req.proof.clone());
    confirmed.verified_at = Some(now);

    let commit = AggregateCommit::on(snapshot)
        .update_entry(confirmed.clone())
        .consume(req.proof.clone(), entry.id);
    Ok(ConfirmationPlan::Commit {
        commit,
        entry: confirmed,
    })
}

/// Commits entry state transitions with compare-and-swap retries.
pub struct ConfirmationCoordinator {
    store: Arc<dyn RaffleStore>,
    max_attempts: u32,
}

impl ConfirmationCoordinator {
    pub fn new(store: Arc<dyn RaffleStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn RaffleStore> {
        &self.store
    }

    /// Atomically confirm a verified payment.
    ///
    /// Safe to retry: a replay with the same proof returns
    /// [`Confirmation::AlreadyConfirmed`] without writing.
    pub async fn confirm(
        &self,
        req: &ConfirmRequest,
        now: DateTime<Utc>,
    ) -> ConfirmResult<Confirmation> {
        for attempt in 1..=self.max_attempts {
            let snapshot = self
                .store
                .snapshot(&req.raffle_id)
                .await?
                .ok_or(ConfirmError::RaffleNotFound(req.raffle_id))?;

            let (commit, entry) = match plan_confirmation(&snapshot, req, now)? {
                ConfirmationPlan::Noop(entry) => {
                    debug!(entry_id = %entry.id, "confirmation replayed");
                    return Ok(Confirmation::AlreadyConfirmed(entry));
                }
                ConfirmationPlan::Commit { commit, entry } => (commit, entry),
            };

            match self.store.commit(&commit).await {
                Ok(version) => {
                    info!(
                        entry_id = %entry.id,
                        raffle_id = %entry.raffle_id,
                        tickets = entry.ticket_quantity,
                        proof = req.proof.short(),
                        version,
                        "entry confirmed"
                    );
                    return Ok(Confirmation::Confirmed(entry));
                }
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(entry_id = %req.entry_id, attempt, "confirmation raced; re-reading");
                }
                Err(StoreError::ProofConsumed { proof, owner }) => {
                    return Err(ConfirmError::ProofUsed { proof, owner });
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(entry_id = %req.entry_id, attempts = self.max_attempts, "confirmation contended");
        Err(ConfirmError::Contention(self.max_attempts))
    }

    /// Attach `proof` to a pending entry as its payment claim, stamping the
    /// claim time with `now`.
    ///
    /// Replaces an earlier unconsumed proof. Returns the entry unchanged if it
    /// already carries `proof`, whatever its status. Refuses a proof that any
    /// other entry has consumed.
    pub async fn attach_proof(
        &self,
        entry_id: &EntryId,
        proof: &TxSignature,
        now: DateTime<Utc>,
    ) -> ConfirmResult<Entry> {
        if let Some((_, owner)) = self.store.proof_owner(proof).await? {
            if owner != *entry_id {
                return Err(ConfirmError::ProofUsed {
                    proof: proof.clone(),
                    owner,
                });
            }
        }

        self.transition(entry_id, |entry| {
            if entry.proof.as_ref() == Some(proof) {
                return Ok(None);
            }
            if !entry.is_pending() {
                return Err(ConfirmError::InvalidState {
                    entry: entry.id,
                    status: entry.status,
                });
            }
            let mut updated = entry.clone();
            updated.proof = Some(proof.clone());
            updated.claimed_at = Some(now);
            Ok(Some(updated))
        })
        .await
    }

    /// Reject a pending entry whose claim `proof` can never verify.
    ///
    /// Fails if the entry moved on or its claim changed since it was checked.
    pub async fn reject(
        &self,
        entry_id: &EntryId,
        proof: &TxSignature,
        reason: &str,
    ) -> ConfirmResult<Entry> {
        let entry = self.transition(entry_id, |entry| {
            if !entry.is_pending() {
                return Err(ConfirmError::InvalidState {
                    entry: entry.id,
                    status: entry.status,
                });
            }
            if entry.proof.as_ref() != Some(proof) {
                return Err(ConfirmError::Mismatch {
                    entry: entry.id,
                    field: "proof",
                });
            }
            let mut updated = entry.clone();
            updated.status = EntryStatus::Rejected;
            Ok(Some(updated))
        })
        .await?;
        info!(entry_id = %entry.id, proof = proof.short(), reason, "entry rejected");
        Ok(entry)
    }

    /// Read-plan-commit loop for a single-entry update. `plan` returns
    /// `None` when the stored entry is already in the wanted shape.
    async fn transition<F>(&self, entry_id: &EntryId, plan: F) -> ConfirmResult<Entry>
    where
        F: Fn(&Entry) -> ConfirmResult<Option<Entry>>,
    {
        for attempt in 1..=self.max_attempts {
            let snapshot = self
                .store
                .snapshot_for_entry(entry_id)
                .await?
                .ok_or(ConfirmError::EntryNotFound(*entry_id))?;
            let current = snapshot
                .entry(entry_id)
                .ok_or(ConfirmError::EntryNotFound(*entry_id))?;

            let Some(updated) = plan(current)? else {
                return Ok(current.clone());
            };

            let commit = AggregateCommit::on(&snapshot).update_entry(updated.clone());
            match self.store.commit(&commit).await {
                Ok(_) => return Ok(updated),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(entry_id = %entry_id, attempt, "entry update raced; re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ConfirmError::Contention(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use raffle_store::InMemoryRaffleStore;
    use raffle_types::{Currency, Raffle};

    fn wallet(n: usize) -> WalletAddress {
        let mut bytes = [7u8; 32];
        bytes[..8].copy_from_slice(&(n as u64).to_be_bytes());
        WalletAddress::from_bytes(bytes)
    }

    fn proof(n: usize) -> TxSignature {
        let mut bytes = [9u8; 64];
        bytes[..8].copy_from_slice(&(n as u64).to_be_bytes());
        TxSignature::from_bytes(bytes)
    }

    async fn setup(max: Option<u32>) -> (Arc<InMemoryRaffleStore>, Raffle) {
        let store = Arc::new(InMemoryRaffleStore::new());
        let now = Utc::now();
        let mut raffle = Raffle::new(
            "test",
            Decimal::new(5, 1),
            Currency::Sol,
            now - Duration::days(1),
            now + Duration::days(1),
        );
        raffle.max_tickets = max;
        store.insert_raffle(&raffle).await.unwrap();
        (store, raffle)
    }

    async fn add_entry(store: &InMemoryRaffleStore, raffle: &Raffle, n: usize, qty: u32) -> Entry {
        let entry = Entry::new(raffle, wallet(n), qty, Utc::now()).unwrap();
        store.insert_entry(&entry).await.unwrap();
        entry
    }

    fn coordinator(store: &Arc<InMemoryRaffleStore>) -> ConfirmationCoordinator {
        ConfirmationCoordinator::new(store.clone())
    }

    #[tokio::test]
    async fn confirms_pending_entry() {
        let (store, raffle) = setup(Some(10)).await;
        let entry = add_entry(&store, &raffle, 0, 3).await;
        let now = Utc::now();

        let out = coordinator(&store)
            .confirm(&ConfirmRequest::for_entry(&entry, proof(1)), now)
            .await
            .unwrap();
        assert!(out.is_new());
        assert_eq!(out.entry().status, EntryStatus::Confirmed);
        assert_eq!(out.entry().verified_at, Some(now));

        let snapshot = store.snapshot(&raffle.id).await.unwrap().unwrap();
        assert_eq!(snapshot.confirmed_tickets(), 3);
        assert_eq!(snapshot.proof_owner(&proof(1)), Some(entry.id));
    }

    #[tokio::test]
    async fn replay_is_idempotent_and_writes_nothing() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 1).await;
        let req = ConfirmRequest::for_entry(&entry, proof(1));
        let c = coordinator(&store);

        c.confirm(&req, Utc::now()).await.unwrap();
        let version = store.snapshot(&raffle.id).await.unwrap().unwrap().version;

        let again = c.confirm(&req, Utc::now()).await.unwrap();
        assert!(!again.is_new());
        assert_eq!(store.snapshot(&raffle.id).await.unwrap().unwrap().version, version);
    }

    #[tokio::test]
    async fn proof_reuse_refused() {
        let (store, raffle) = setup(None).await;
        let first = add_entry(&store, &raffle, 0, 1).await;
        let second = add_entry(&store, &raffle, 1, 1).await;
        let c = coordinator(&store);

        c.confirm(&ConfirmRequest::for_entry(&first, proof(1)), Utc::now())
            .await
            .unwrap();
        let err = c
            .confirm(&ConfirmRequest::for_entry(&second, proof(1)), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConfirmError::ProofUsed {
                proof: proof(1),
                owner: first.id
            }
        );
    }

    #[tokio::test]
    async fn proof_reuse_across_raffles_refused() {
        let (store, raffle_a) = setup(None).await;
        let now = Utc::now();
        let raffle_b = Raffle::new("b", Decimal::ONE, Currency::Sol, now, now + Duration::days(1));
        store.insert_raffle(&raffle_b).await.unwrap();
        let a = add_entry(&store, &raffle_a, 0, 1).await;
        let b = add_entry(&store, &raffle_b, 1, 1).await;
        let c = coordinator(&store);

        c.confirm(&ConfirmRequest::for_entry(&a, proof(7)), now).await.unwrap();
        let err = c
            .confirm(&ConfirmRequest::for_entry(&b, proof(7)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::ProofUsed { owner, .. } if owner == a.id));
    }

    #[tokio::test]
    async fn confirmed_entry_with_other_proof_is_invalid_state() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 1).await;
        let c = coordinator(&store);
        c.confirm(&ConfirmRequest::for_entry(&entry, proof(1)), Utc::now())
            .await
            .unwrap();

        let err = c
            .confirm(&ConfirmRequest::for_entry(&entry, proof(2)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::InvalidState { status: EntryStatus::Confirmed, .. }));
    }

    #[tokio::test]
    async fn capacity_enforced() {
        let (store, raffle) = setup(Some(5)).await;
        let a = add_entry(&store, &raffle, 0, 3).await;
        let b = add_entry(&store, &raffle, 1, 3).await;
        let c = coordinator(&store);

        c.confirm(&ConfirmRequest::for_entry(&a, proof(1)), Utc::now())
            .await
            .unwrap();
        let err = c
            .confirm(&ConfirmRequest::for_entry(&b, proof(2)), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConfirmError::InsufficientTickets {
                requested: 3,
                remaining: 2
            }
        );
        assert!(store.entry(&b.id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn mismatched_request_refused() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 2).await;
        let mut req = ConfirmRequest::for_entry(&entry, proof(1));
        req.ticket_quantity = 20;
        let err = coordinator(&store).confirm(&req, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ConfirmError::Mismatch { field: "ticket quantity", .. }));
    }

    #[tokio::test]
    async fn stale_plan_loses_the_race() {
        let (store, raffle) = setup(Some(1)).await;
        let a = add_entry(&store, &raffle, 0, 1).await;
        let b = add_entry(&store, &raffle, 1, 1).await;
        let snapshot = store.snapshot(&raffle.id).await.unwrap().unwrap();
        let now = Utc::now();

        // Both plans see one ticket left.
        let plan = |e: &Entry, p| match plan_confirmation(&snapshot, &ConfirmRequest::for_entry(e, proof(p)), now) {
            Ok(ConfirmationPlan::Commit { commit, .. }) => commit,
            other => panic!("unexpected plan: {other:?}"),
        };
        let first = plan(&a, 1);
        let second = plan(&b, 2);

        store.commit(&first).await.unwrap();
        assert!(matches!(
            store.commit(&second).await,
            Err(StoreError::VersionConflict { .. })
        ));

        // Re-planning through the coordinator sees the cap.
        let err = coordinator(&store)
            .confirm(&ConfirmRequest::for_entry(&b, proof(2)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::InsufficientTickets { remaining: 0, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_never_oversell() {
        let (store, raffle) = setup(Some(10)).await;
        let mut entries = Vec::new();
        for n in 0..40 {
            entries.push(add_entry(&store, &raffle, n, 1 + (n % 3) as u32).await);
        }
        let c = Arc::new(coordinator(&store).with_max_attempts(1_000));

        let handles: Vec<_> = entries
            .into_iter()
            .enumerate()
            .map(|(n, entry)| {
                let c = c.clone();
                tokio::spawn(async move {
                    c.confirm(&ConfirmRequest::for_entry(&entry, proof(n)), Utc::now())
                        .await
                })
            })
            .collect();
        for h in handles {
            match h.await.unwrap() {
                Ok(_) | Err(ConfirmError::InsufficientTickets { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let snapshot = store.snapshot(&raffle.id).await.unwrap().unwrap();
        // Plenty of single-ticket entries remain, so the cap is filled exactly.
        assert_eq!(snapshot.confirmed_tickets(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_replays_confirm_once() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 4).await;
        let c = Arc::new(coordinator(&store).with_max_attempts(1_000));
        let req = ConfirmRequest::for_entry(&entry, proof(9));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let (c, req) = (c.clone(), req.clone());
                tokio::spawn(async move { c.confirm(&req, Utc::now()).await.unwrap() })
            })
            .collect();
        let mut fresh = 0;
        for h in handles {
            if h.await.unwrap().is_new() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(store.snapshot(&raffle.id).await.unwrap().unwrap().confirmed_tickets(), 4);
    }

    #[tokio::test]
    async fn attach_replaces_unconsumed_proof() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 1).await;
        let c = coordinator(&store);

        c.attach_proof(&entry.id, &proof(1), Utc::now()).await.unwrap();
        let updated = c.attach_proof(&entry.id, &proof(2), Utc::now()).await.unwrap();
        assert_eq!(updated.proof, Some(proof(2)));
        assert!(updated.is_pending());
    }

    #[tokio::test]
    async fn attach_stamps_claim_time() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 1).await;
        let c = coordinator(&store);
        let first = entry.created_at + Duration::hours(3);

        let claimed = c.attach_proof(&entry.id, &proof(1), first).await.unwrap();
        assert_eq!(claimed.claimed_at, Some(first));
        assert_eq!(claimed.claimed_since(), first);

        // Re-submitting the same claim keeps its original age.
        let later = first + Duration::minutes(30);
        let same = c.attach_proof(&entry.id, &proof(1), later).await.unwrap();
        assert_eq!(same.claimed_at, Some(first));

        // A new claim restarts it.
        let replaced = c.attach_proof(&entry.id, &proof(2), later).await.unwrap();
        assert_eq!(replaced.claimed_at, Some(later));
        assert_eq!(store.entry(&entry.id).await.unwrap().unwrap().claimed_at, Some(later));
    }

    #[tokio::test]
    async fn attach_refuses_consumed_proof() {
        let (store, raffle) = setup(None).await;
        let a = add_entry(&store, &raffle, 0, 1).await;
        let b = add_entry(&store, &raffle, 1, 1).await;
        let c = coordinator(&store);
        c.confirm(&ConfirmRequest::for_entry(&a, proof(1)), Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            c.attach_proof(&b.id, &proof(1), Utc::now()).await,
            Err(ConfirmError::ProofUsed { .. })
        ));
        // The owner re-attaching its own proof is a no-op.
        assert!(c
            .attach_proof(&a.id, &proof(1), Utc::now())
            .await
            .unwrap()
            .is_confirmed());
    }

    #[tokio::test]
    async fn reject_is_terminal() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 1).await;
        let c = coordinator(&store);
        c.attach_proof(&entry.id, &proof(1), Utc::now()).await.unwrap();

        let rejected = c.reject(&entry.id, &proof(1), "amount mismatch").await.unwrap();
        assert_eq!(rejected.status, EntryStatus::Rejected);
        assert_eq!(rejected.verified_at, None);

        assert!(matches!(
            c.confirm(&ConfirmRequest::for_entry(&entry, proof(1)), Utc::now()).await,
            Err(ConfirmError::InvalidState { status: EntryStatus::Rejected, .. })
        ));
        assert!(matches!(
            c.attach_proof(&entry.id, &proof(2), Utc::now()).await,
            Err(ConfirmError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn reject_refuses_changed_claim() {
        let (store, raffle) = setup(None).await;
        let entry = add_entry(&store, &raffle, 0, 1).await;
        let c = coordinator(&store);
        c.attach_proof(&entry.id, &proof(2), Utc::now()).await.unwrap();

        assert!(matches!(
            c.reject(&entry.id, &proof(1), "stale").await,
            Err(ConfirmError::Mismatch { field: "proof", .. })
        ));
        assert!(store.entry(&entry.id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn unknown_entry_not_found() {
        let (store, _) = setup(None).await;
        let id = EntryId::new();
        assert_eq!(
            coordinator(&store).attach_proof(&id, &proof(1), Utc::now()).await,
            Err(ConfirmError::EntryNotFound(id))
        );
    }

    proptest! {
        #[test]
        fn confirmed_total_never_exceeds_cap(
            cap in 1u32..40,
            quantities in proptest::collection::vec(1u32..8, 1..30),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (store, raffle) = setup(Some(cap)).await;
                let c = coordinator(&store);
                for (n, qty) in quantities.iter().enumerate() {
                    let entry = add_entry(&store, &raffle, n, *qty).await;
                    let res = c
                        .confirm(&ConfirmRequest::for_entry(&entry, proof(n)), Utc::now())
                        .await;
                    prop_assert!(
                        matches!(res, Ok(_) | Err(ConfirmError::InsufficientTickets { .. })),
                        "unexpected {:?}",
                        res
                    );
                }
                let snapshot = store.snapshot(&raffle.id).await.unwrap().unwrap();
                prop_assert!(snapshot.confirmed_tickets() <= u64::from(cap));
                Ok(())
            })?;
        }
    }
}
