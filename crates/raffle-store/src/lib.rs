//! Transactional storage for raffle aggregates.
//!
//! A raffle aggregate is the raffle row, its entries in creation order, and
//! the set of payment proofs consumed by confirmed entries. Every mutation is
//! expressed as an [`AggregateCommit`] against a versioned snapshot and is
//! applied with compare-and-swap semantics: if anything changed since the
//! snapshot was read, the commit aborts with [`StoreError::VersionConflict`]
//! and the caller re-reads and re-plans.
//!
//! # Storage Backends
//!
//! - [`InMemoryRaffleStore`] -- `HashMap` behind a `RwLock`, for tests and
//!   single-instance deployments
//! - [`PgRaffleStore`] -- PostgreSQL tables with row locks, for deployments
//!   that share state across instances
//!
//! # Design Rules
//!
//! 1. A proof is consumed by at most one entry across all raffles, ever.
//! 2. Commits are all-or-nothing; a failed check leaves no partial writes.
//! 3. Entries are returned in creation order so draws are deterministic.
//! 4. Pending claims page by claim time, so a caller can walk the whole queue
//!    instead of re-reading the oldest rows.

pub mod aggregate;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use aggregate::{AggregateCommit, ClaimCursor, RaffleAggregate};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRaffleStore;
pub use postgres::PgRaffleStore;
pub use traits::RaffleStore;
