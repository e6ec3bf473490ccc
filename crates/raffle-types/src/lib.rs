//! Foundation types for the raffle confirmation pipeline.
//!
//! This crate provides the identity, payment, and aggregate types shared by
//! every other crate in the workspace.
//!
//! # Key Types
//!
//! - [`RaffleId`] / [`EntryId`] -- UUID v7 identifiers (time-ordered)
//! - [`WalletAddress`] -- validated base58 account address
//! - [`TxSignature`] -- validated base58 transaction signature (payment proof)
//! - [`Currency`] -- the fixed set of accepted payment currencies
//! - [`Raffle`] -- raffle metadata, draw state, and extension bookkeeping
//! - [`Entry`] / [`EntryStatus`] -- a wallet's ticket claim and its verification state

pub mod address;
pub mod currency;
pub mod entry;
pub mod error;
pub mod id;
pub mod raffle;

pub use address::{TxSignature, WalletAddress};
pub use currency::Currency;
pub use entry::{Entry, EntryStatus};
pub use error::TypeError;
pub use id::{EntryId, RaffleId};
pub use raffle::Raffle;
