use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all raffle endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/verify", post(handler::verify_handler))
        .route("/v1/select-winner", post(handler::select_winner_handler))
        .route("/v1/entries", post(handler::create_entry_handler))
        .route("/v1/raffles", post(handler::create_raffle_handler))
        .route("/v1/raffles/:id/trust", get(handler::trust_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
