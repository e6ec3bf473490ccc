//! Ledger logic over raffle aggregates.
//!
//! This crate owns the rules that turn verified payments into confirmed
//! tickets and confirmed tickets into a winner:
//! - [`ConfirmationCoordinator`] -- the atomic pending -> confirmed/rejected
//!   transition, guarding the ticket cap and single use of each proof
//! - [`WinnerSelector`] -- the eligibility state machine, minimum-ticket
//!   extensions, and the weighted draw
//! - [`trust_score`] -- a 0..=100 score derived from the entry ledger
//!
//! Every write goes through [`raffle_store::RaffleStore::commit`] against a
//! versioned snapshot. A conflicting commit is re-planned from a fresh
//! snapshot, never applied blind.

pub mod coordinator;
pub mod draw;
pub mod error;
pub mod policy;
pub mod trust;

pub use coordinator::{
    plan_confirmation, Confirmation, ConfirmRequest, ConfirmationCoordinator, ConfirmationPlan,
};
pub use draw::{evaluate, weighted_pick, DrawOutcome, Eligibility, WinnerSelector};
pub use error::{ConfirmError, ConfirmResult, DrawError, DrawResult};
pub use policy::DrawPolicy;
pub use trust::{trust_score, TrustScore};

/// Commit attempts before giving up on a contended aggregate.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
