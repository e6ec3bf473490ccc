use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use raffle_types::{Entry, EntryId, Raffle, RaffleId, TxSignature};
use serde::{Deserialize, Serialize};

/// Consistent snapshot of a raffle and everything that hangs off it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleAggregate {
    pub raffle: Raffle,
    /// Entries in creation order.
    pub entries: Vec<Entry>,
    /// Proofs consumed by confirmed entries of this raffle.
    pub consumed: BTreeMap<TxSignature, EntryId>,
    /// Monotonic version, bumped by every successful write.
    pub version: u64,
}

impl RaffleAggregate {
    pub fn new(raffle: Raffle) -> Self {
        Self {
            raffle,
            entries: Vec::new(),
            consumed: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn id(&self) -> RaffleId {
        self.raffle.id
    }

    pub fn entry(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn confirmed_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_confirmed())
    }

    /// Sum of ticket quantities over confirmed entries.
    pub fn confirmed_tickets(&self) -> u64 {
        self.confirmed_entries()
            .map(|e| u64::from(e.ticket_quantity))
            .sum()
    }

    /// Entry that consumed `proof` within this raffle, if any.
    pub fn proof_owner(&self, proof: &TxSignature) -> Option<EntryId> {
        self.consumed.get(proof).copied()
    }
}

/// A conditional write against one raffle aggregate.
///
/// Applied only if the aggregate is still at `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateCommit {
    pub raffle_id: RaffleId,
    pub expected_version: u64,
    pub raffle: Option<Raffle>,
    pub entries: Vec<Entry>,
    pub consume: Vec<(TxSignature, EntryId)>,
}

impl AggregateCommit {
    /// Start an empty commit conditioned on `snapshot`'s version.
    pub fn on(snapshot: &RaffleAggregate) -> Self {
        Self {
            raffle_id: snapshot.id(),
            expected_version: snapshot.version,
            raffle: None,
            entries: Vec::new(),
            consume: Vec::new(),
        }
    }

    pub fn update_raffle(mut self, raffle: Raffle) -> Self {
        self.raffle = Some(raffle);
        self
    }

    pub fn update_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn consume(mut self, proof: TxSignature, entry: EntryId) -> Self {
        self.consume.push((proof, entry));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.raffle.is_none() && self.entries.is_empty() && self.consume.is_empty()
    }
}

/// Position in the queue of pending claims.
///
/// Claims are ordered by claim age, then entry id. A cursor names the last
/// claim a caller has seen; the next page starts strictly after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClaimCursor {
    pub claimed_since: DateTime<Utc>,
    pub entry: EntryId,
}

impl ClaimCursor {
    pub fn of(entry: &Entry) -> Self {
        Self {
            claimed_since: entry.claimed_since(),
            entry: entry.id,
        }
    }
}
