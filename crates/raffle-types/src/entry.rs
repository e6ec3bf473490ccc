use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::{TxSignature, WalletAddress};
use crate::currency::Currency;
use crate::error::TypeError;
use crate::id::{EntryId, RaffleId};
use crate::raffle::Raffle;

/// Verification state of an entry. `Confirmed` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A wallet's claim to one or more tickets of a raffle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    pub raffle_id: RaffleId,
    pub wallet: WalletAddress,
    pub ticket_quantity: u32,
    pub amount: Decimal,
    pub currency: Currency,
    pub proof: Option<TxSignature>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    /// When the current proof was attached.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Create a pending entry priced from the raffle's ticket price.
    pub fn new(
        raffle: &Raffle,
        wallet: WalletAddress,
        ticket_quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, TypeError> {
        let amount = raffle.price_for(ticket_quantity)?;
        Ok(Self {
            id: EntryId::new(),
            raffle_id: raffle.id,
            wallet,
            ticket_quantity,
            amount,
            currency: raffle.currency,
            proof: None,
            status: EntryStatus::Pending,
            created_at: now,
            claimed_at: None,
            verified_at: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == EntryStatus::Confirmed
    }

    /// Start of the current claim's age. Entries stored before claims were
    /// timestamped fall back to their creation time.
    pub fn claimed_since(&self) -> DateTime<Utc> {
        self.claimed_at.unwrap_or(self.created_at)
    }

    /// Whether this entry already consumed `proof`.
    pub fn is_confirmed_with(&self, proof: &TxSignature) -> bool {
        self.is_confirmed() && self.proof.as_ref() == Some(proof)
    }
}
