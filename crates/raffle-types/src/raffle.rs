use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::WalletAddress;
use crate::currency::Currency;
use crate::error::TypeError;
use crate::id::RaffleId;

/// A raffle and its draw state.
///
/// `winner_wallet` and `winner_selected_at` are written together, at most
/// once. `original_end_time` is captured on the first extension and never
/// moved afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Raffle {
    pub id: RaffleId,
    pub title: String,
    pub ticket_price: Decimal,
    pub currency: Currency,
    pub max_tickets: Option<u32>,
    pub min_tickets: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub original_end_time: Option<DateTime<Utc>>,
    pub extension_count: u32,
    pub edited_after_entries: bool,
    pub winner_wallet: Option<WalletAddress>,
    pub winner_selected_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Raffle {
    /// Create an active raffle with no caps, thresholds, or winner.
    pub fn new(
        title: impl Into<String>,
        ticket_price: Decimal,
        currency: Currency,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RaffleId::new(),
            title: title.into(),
            ticket_price,
            currency,
            max_tickets: None,
            min_tickets: None,
            start_time,
            end_time,
            original_end_time: None,
            extension_count: 0,
            edited_after_entries: false,
            winner_wallet: None,
            winner_selected_at: None,
            is_active: true,
        }
    }

    pub fn with_max_tickets(mut self, max: u32) -> Self {
        self.max_tickets = Some(max);
        self
    }

    pub fn with_min_tickets(mut self, min: u32) -> Self {
        self.min_tickets = Some(min);
        self
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    pub fn has_winner(&self) -> bool {
        self.winner_wallet.is_some()
    }

    /// Whether new entries may be created at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.has_winner() && now >= self.start_time && !self.has_ended(now)
    }

    /// The end time scheduled before any extension.
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.original_end_time.unwrap_or(self.end_time)
    }

    /// Total price for `quantity` tickets.
    pub fn price_for(&self, quantity: u32) -> Result<Decimal, TypeError> {
        if quantity == 0 {
            return Err(TypeError::ZeroQuantity);
        }
        self.ticket_price
            .checked_mul(Decimal::from(quantity))
            .ok_or(TypeError::AmountOverflow)
    }

    /// Tickets still sellable given `confirmed` already sold. `None` when uncapped.
    pub fn remaining_tickets(&self, confirmed: u64) -> Option<u64> {
        self.max_tickets
            .map(|max| u64::from(max).saturating_sub(confirmed))
    }

    /// Push the end time out by `window`, recording the original end once.
    pub fn extend_end(&mut self, window: Duration) {
        if self.original_end_time.is_none() {
            self.original_end_time = Some(self.end_time);
        }
        self.end_time += window;
        self.extension_count += 1;
    }

    /// Record the winner. Returns `false` and leaves the raffle untouched if a
    /// winner is already set.
    pub fn record_winner(&mut self, wallet: WalletAddress, at: DateTime<Utc>) -> bool {
        if self.has_winner() {
            return false;
        }
        self.winner_wallet = Some(wallet);
        self.winner_selected_at = Some(at);
        true
    }
}
