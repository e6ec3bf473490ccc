//! Verify-then-commit for one entry, serialized per entry.
//!
//! The request handler and the background sweep both drive claims through
//! [`ConfirmationPipeline::process`], so both get the same lock discipline
//! and the same mapping from verification results to entry transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use raffle_chain::{TransactionVerifier, Verification};
use raffle_guard::{with_lock, GuardError, VerificationLock};
use raffle_ledger::{ConfirmError, ConfirmRequest, ConfirmationCoordinator};
use raffle_store::{RaffleStore, StoreError};
use raffle_types::{Entry, EntryId, RaffleId, TxSignature};
use thiserror::Error;
use tracing::{debug, warn};

/// Where a claim ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The entry is confirmed; `fresh` when this call confirmed it.
    Confirmed { entry: Entry, fresh: bool },
    /// Not decidable yet; the entry stays pending.
    Pending { reason: String },
    /// The claim can never verify; the entry is now rejected.
    Rejected { reason: String },
    /// Another verification of this entry is in flight.
    Busy,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("raffle not found: {0}")]
    RaffleNotFound(RaffleId),

    #[error("entry {0} has no payment claim")]
    MissingProof(EntryId),

    /// A definite refusal from the commit rules.
    #[error("conflict: {0}")]
    Conflict(ConfirmError),

    /// Verification cannot run with the current configuration.
    #[error("verification unavailable: {0}")]
    Unavailable(String),

    #[error("commit failed: {0}")]
    Commit(ConfirmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Guard(#[from] GuardError),
}

impl From<ConfirmError> for PipelineError {
    fn from(e: ConfirmError) -> Self {
        match e {
            ConfirmError::EntryNotFound(id) => Self::EntryNotFound(id),
            ConfirmError::RaffleNotFound(id) => Self::RaffleNotFound(id),
            e if e.is_conflict() => Self::Conflict(e),
            e => Self::Commit(e),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub struct ConfirmationPipeline {
    store: Arc<dyn RaffleStore>,
    coordinator: ConfirmationCoordinator,
    verifier: TransactionVerifier,
    lock: Arc<dyn VerificationLock>,
}

impl ConfirmationPipeline {
    pub fn new(
        store: Arc<dyn RaffleStore>,
        verifier: TransactionVerifier,
        lock: Arc<dyn VerificationLock>,
    ) -> Self {
        Self {
            coordinator: ConfirmationCoordinator::new(store.clone()),
            store,
            verifier,
            lock,
        }
    }

    pub fn store(&self) -> &Arc<dyn RaffleStore> {
        &self.store
    }

    pub fn verifier(&self) -> &TransactionVerifier {
        &self.verifier
    }

    /// Verify and settle the claim on `entry_id`.
    ///
    /// With `claim` set, that proof is attached first (replacing an
    /// unconsumed one); otherwise the proof already on the entry is used.
    pub async fn process(
        &self,
        entry_id: EntryId,
        claim: Option<TxSignature>,
        now: DateTime<Utc>,
    ) -> PipelineResult<PipelineOutcome> {
        let outcome = with_lock(self.lock.clone(), entry_id, || self.settle(entry_id, claim, now)).await?;
        match outcome {
            Some(result) => result,
            None => {
                debug!(entry_id = %entry_id, "verification already in flight");
                Ok(PipelineOutcome::Busy)
            }
        }
    }

    /// Reject a claim that has been pending since before `cutoff`.
    ///
    /// The entry is reloaded under the lock, so a claim that was replaced or
    /// settled after the caller looked at it is left alone.
    pub async fn abandon(&self, entry_id: EntryId, cutoff: DateTime<Utc>) -> PipelineResult<PipelineOutcome> {
        let outcome = with_lock(self.lock.clone(), entry_id, || async {
            let entry = self.load(&entry_id).await?;
            if !entry.is_pending() {
                return Err(PipelineError::Conflict(ConfirmError::InvalidState {
                    entry: entry.id,
                    status: entry.status,
                }));
            }
            let proof = entry.proof.clone().ok_or(PipelineError::MissingProof(entry_id))?;
            if entry.claimed_since() >= cutoff {
                return Ok(PipelineOutcome::Pending {
                    reason: "claim is still within its verification window".into(),
                });
            }
            let reason = "claim abandoned while pending";
            self.coordinator.reject(&entry_id, &proof, reason).await?;
            Ok(PipelineOutcome::Rejected {
                reason: reason.into(),
            })
        })
        .await?;
        outcome.unwrap_or(Ok(PipelineOutcome::Busy))
    }

    async fn load(&self, entry_id: &EntryId) -> PipelineResult<Entry> {
        self.store
            .entry(entry_id)
            .await?
            .ok_or(PipelineError::EntryNotFound(*entry_id))
    }

    async fn settle(
        &self,
        entry_id: EntryId,
        claim: Option<TxSignature>,
        now: DateTime<Utc>,
    ) -> PipelineResult<PipelineOutcome> {
        let stored = self.load(&entry_id).await?;
        let attaching = claim.is_some();
        let proof = match claim {
            Some(proof) => proof,
            None => stored.proof.clone().ok_or(PipelineError::MissingProof(entry_id))?,
        };

        if stored.is_confirmed_with(&proof) {
            return Ok(PipelineOutcome::Confirmed {
                entry: stored,
                fresh: false,
            });
        }

        let entry = if attaching {
            self.coordinator.attach_proof(&entry_id, &proof, now).await?
        } else {
            stored
        };
        if !entry.is_pending() {
            return Err(PipelineError::Conflict(ConfirmError::InvalidState {
                entry: entry.id,
                status: entry.status,
            }));
        }

        let raffle = self
            .store
            .raffle(&entry.raffle_id)
            .await?
            .ok_or(PipelineError::RaffleNotFound(entry.raffle_id))?;

        match self.verifier.verify_at(&proof, &entry, &raffle, now).await {
            Verification::Valid => {
                let req = ConfirmRequest::for_entry(&entry, proof.clone());
                match self.coordinator.confirm(&req, now).await {
                    Ok(confirmation) => Ok(PipelineOutcome::Confirmed {
                        fresh: confirmation.is_new(),
                        entry: confirmation.entry().clone(),
                    }),
                    // Confirmed totals only grow, so this claim can never fit.
                    Err(ConfirmError::InsufficientTickets { requested, remaining }) => {
                        warn!(entry_id = %entry.id, requested, remaining, "paid claim exceeds remaining tickets");
                        let reason = "insufficient tickets remaining";
                        self.coordinator.reject(&entry.id, &proof, reason).await?;
                        Ok(PipelineOutcome::Rejected {
                            reason: reason.into(),
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Verification::Pending { reason } => Ok(PipelineOutcome::Pending { reason }),
            Verification::Invalid { reason } => {
                let reason = reason.to_string();
                self.coordinator.reject(&entry.id, &proof, &reason).await?;
                Ok(PipelineOutcome::Rejected { reason })
            }
            Verification::Unavailable { reason } => Err(PipelineError::Unavailable(reason)),
        }
    }
}
