//! HTTP server for the raffle confirmation pipeline.
//!
//! Exposes a deliberately uninformative surface: every failure renders the
//! same body shape, and the precise cause is only ever logged.
//!
//! | Endpoint | Purpose |
//! |---|---|
//! | `GET /v1/health` | liveness and ledger configuration |
//! | `POST /v1/verify` | attach and verify a payment claim |
//! | `POST /v1/entries` | create a pending entry |
//! | `POST /v1/raffles` | register a raffle (admin) |
//! | `POST /v1/select-winner` | draw or extend a raffle (admin) |
//! | `GET /v1/raffles/:id/trust` | trust score and components |

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod router;
pub mod server;
pub mod state;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{Action, AdminAuth, Credentials, Identity, StaticTokenAuth};
pub use config::{AppConfig, ServerConfig, StoreConfig, SweepConfig};
pub use error::{ApiError, ServerError, ServerResult};
pub use pipeline::{ConfirmationPipeline, PipelineError, PipelineOutcome};
pub use router::build_router;
pub use server::RaffleServer;
pub use state::AppState;
pub use sweep::{SweepReport, Sweeper};
