//! Winner selection.
//!
//! A raffle moves through `not-ended -> ended-below-minimum -> ended-eligible
//! -> drawn`. Below-minimum raffles are extended instead of drawn; eligible
//! raffles wait out a grace period after their original end; drawn raffles
//! keep their winner forever.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use raffle_store::{AggregateCommit, RaffleStore, StoreError};
use raffle_types::{Entry, EntryId, Raffle, RaffleId, WalletAddress};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{DrawError, DrawResult};
use crate::policy::DrawPolicy;
use crate::DEFAULT_MAX_ATTEMPTS;

/// Where a raffle stands with respect to drawing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eligibility {
    NotEnded { ends_at: DateTime<Utc> },
    /// Ended under its minimum; should be extended.
    BelowMinimum { confirmed: u64, minimum: u32 },
    /// Ended under its minimum with no extensions left.
    ExtensionLimitReached { confirmed: u64, minimum: u32, extensions: u32 },
    WaitingPeriod { eligible_at: DateTime<Utc> },
    Eligible,
    Drawn { winner: WalletAddress, selected_at: Option<DateTime<Utc>> },
}

/// Classify `raffle` at `now`.
///
/// `force` skips the minimum-ticket and waiting-period checks but never
/// allows drawing a raffle that has not ended.
pub fn evaluate(
    raffle: &Raffle,
    confirmed_tickets: u64,
    policy: &DrawPolicy,
    now: DateTime<Utc>,
    force: bool,
) -> Eligibility {
    if let Some(winner) = &raffle.winner_wallet {
        return Eligibility::Drawn {
            winner: winner.clone(),
            selected_at: raffle.winner_selected_at,
        };
    }
    if !raffle.has_ended(now) {
        return Eligibility::NotEnded {
            ends_at: raffle.end_time,
        };
    }
    if force {
        return Eligibility::Eligible;
    }

    if let Some(minimum) = raffle.min_tickets {
        if confirmed_tickets < u64::from(minimum) {
            if policy.may_extend(raffle.extension_count) {
                return Eligibility::BelowMinimum {
                    confirmed: confirmed_tickets,
                    minimum,
                };
            }
            return Eligibility::ExtensionLimitReached {
                confirmed: confirmed_tickets,
                minimum,
                extensions: raffle.extension_count,
            };
        }
    }

    let eligible_at = raffle.scheduled_end() + policy.waiting_period();
    if now < eligible_at {
        return Eligibility::WaitingPeriod { eligible_at };
    }
    Eligibility::Eligible
}

/// Pick an entry with probability proportional to its ticket quantity.
///
/// Entries are walked in the given order; returns `None` when the total
/// weight is zero.
pub fn weighted_pick<'a, R>(entries: &[&'a Entry], rng: &mut R) -> Option<&'a Entry>
where
    R: Rng + ?Sized,
{
    let total: u64 = entries.iter().map(|e| u64::from(e.ticket_quantity)).sum();
    if total == 0 {
        return None;
    }
    let target = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for entry in entries {
        cumulative += u64::from(entry.ticket_quantity);
        if cumulative > target {
            return Some(*entry);
        }
    }
    None
}

/// Result of a selection attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DrawOutcome {
    /// A winner was drawn by this call.
    Winner {
        wallet: WalletAddress,
        entry_id: EntryId,
        selected_at: DateTime<Utc>,
        total_tickets: u64,
    },
    /// A winner already existed; returned unchanged.
    AlreadyDrawn {
        wallet: WalletAddress,
        selected_at: Option<DateTime<Utc>>,
    },
    NotEnded {
        ends_at: DateTime<Utc>,
    },
    BelowMinimumExtended {
        confirmed: u64,
        minimum: u32,
        new_end_time: DateTime<Utc>,
        extension_count: u32,
    },
    ExtensionLimitReached {
        confirmed: u64,
        minimum: u32,
        extensions: u32,
    },
    WaitingPeriod {
        eligible_at: DateTime<Utc>,
    },
    NoConfirmedEntries,
}

impl DrawOutcome {
    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Winner { .. } => "winner-selected",
            Self::AlreadyDrawn { .. } => "already-drawn",
            Self::NotEnded { .. } => "not-ended",
            Self::BelowMinimumExtended { .. } => "below-minimum-extended",
            Self::ExtensionLimitReached { .. } => "extension-limit-reached",
            Self::WaitingPeriod { .. } => "waiting-period",
            Self::NoConfirmedEntries => "no-confirmed-entries",
        }
    }

    /// The raffle's winner, whether drawn now or earlier.
    pub fn winner(&self) -> Option<&WalletAddress> {
        match self {
            Self::Winner { wallet, .. } | Self::AlreadyDrawn { wallet, .. } => Some(wallet),
            _ => None,
        }
    }
}

/// Draws winners and applies minimum-ticket extensions.
pub struct WinnerSelector {
    store: Arc<dyn RaffleStore>,
    policy: DrawPolicy,
    max_attempts: u32,
}

impl WinnerSelector {
    pub fn new(store: Arc<dyn RaffleStore>, policy: DrawPolicy) -> Self {
        Self {
            store,
            policy,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn policy(&self) -> &DrawPolicy {
        &self.policy
    }

    /// Select a winner using the operating system's secure RNG.
    pub async fn select(
        &self,
        raffle_id: &RaffleId,
        force: bool,
        now: DateTime<Utc>,
    ) -> DrawResult<DrawOutcome> {
        self.select_with(raffle_id, force, now, &mut OsRng).await
    }

    pub async fn select_with<R>(
        &self,
        raffle_id: &RaffleId,
        force: bool,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DrawResult<DrawOutcome>
    where
        R: Rng + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let snapshot = self
                .store
                .snapshot(raffle_id)
                .await?
                .ok_or(DrawError::RaffleNotFound(*raffle_id))?;
            let confirmed = snapshot.confirmed_tickets();

            let (commit, outcome) = match evaluate(&snapshot.raffle, confirmed, &self.policy, now, force) {
                Eligibility::Drawn { winner, selected_at } => {
                    return Ok(DrawOutcome::AlreadyDrawn {
                        wallet: winner,
                        selected_at,
                    })
                }
                Eligibility::NotEnded { ends_at } => return Ok(DrawOutcome::NotEnded { ends_at }),
                Eligibility::WaitingPeriod { eligible_at } => {
                    return Ok(DrawOutcome::WaitingPeriod { eligible_at })
                }
                Eligibility::ExtensionLimitReached {
                    confirmed,
                    minimum,
                    extensions,
                } => {
                    return Ok(DrawOutcome::ExtensionLimitReached {
                        confirmed,
                        minimum,
                        extensions,
                    })
                }
                Eligibility::BelowMinimum { confirmed, minimum } => {
                    let mut raffle = snapshot.raffle.clone();
                    raffle.extend_end(self.policy.extension_window());
                    let outcome = DrawOutcome::BelowMinimumExtended {
                        confirmed,
                        minimum,
                        new_end_time: raffle.end_time,
                        extension_count: raffle.extension_count,
                    };
                    (AggregateCommit::on(&snapshot).update_raffle(raffle), outcome)
                }
                Eligibility::Eligible => {
                    let entries: Vec<&Entry> = snapshot.confirmed_entries().collect();
                    let Some(pick) = weighted_pick(&entries, rng) else {
                        return Ok(DrawOutcome::NoConfirmedEntries);
                    };
                    let mut raffle = snapshot.raffle.clone();
                    raffle.record_winner(pick.wallet.clone(), now);
                    let outcome = DrawOutcome::Winner {
                        wallet: pick.wallet.clone(),
                        entry_id: pick.id,
                        selected_at: now,
                        total_tickets: confirmed,
                    };
                    (AggregateCommit::on(&snapshot).update_raffle(raffle), outcome)
                }
            };

            match self.store.commit(&commit).await {
                Ok(_) => {
                    info!(raffle_id = %raffle_id, outcome = outcome.reason(), force, "draw step committed");
                    return Ok(outcome);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(raffle_id = %raffle_id, attempt, "draw raced; re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DrawError::Contention(self.max_attempts))
    }
}
