//! Endpoint handlers.
//!
//! Request bodies are read as raw bytes and decoded into strict schemas
//! here, after the IP budget is charged, so malformed floods still count.
//! Failures are logged with their cause and answered with [`ApiError`].

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use raffle_guard::{RateLimits, Scope};
use raffle_ledger::{trust_score, DrawError};
use raffle_types::{Currency, Entry, EntryId, Raffle, RaffleId, TxSignature, WalletAddress};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::auth::{Action, Credentials};
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{PipelineError, PipelineOutcome};
use crate::state::AppState;

/// Lock contention backoff hint.
const BUSY_RETRY_SECS: u64 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyRequest {
    pub entry_id: String,
    pub proof: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SelectWinnerRequest {
    pub raffle_id: String,
    #[serde(default)]
    pub force_override: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateEntryRequest {
    pub raffle_id: String,
    pub wallet: String,
    pub ticket_quantity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRaffleRequest {
    pub title: String,
    pub ticket_price: Decimal,
    pub currency: Currency,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub max_tickets: Option<u32>,
    pub min_tickets: Option<u32>,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let verifier = state.pipeline.verifier();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "ledgerConfigured": verifier.client().endpoint().is_some()
            && verifier.config().treasury_wallet.is_some(),
    }))
}

pub async fn verify_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let ip = client_ip(&headers, connect, state.config.server.trust_forwarded_for);
    admit(&state.limits, Scope::Ip, &ip).await?;

    let req: VerifyRequest = decode(&body)?;
    let entry_id: EntryId = req.entry_id.parse().map_err(|_| ApiError::BadRequest)?;
    let proof = TxSignature::parse(&req.proof).map_err(|e| {
        warn!(entry_id = %entry_id, error = %e, "malformed proof");
        ApiError::BadRequest
    })?;

    let entry = state.store.entry(&entry_id).await?.ok_or_else(|| {
        warn!(entry_id = %entry_id, "verify for unknown entry");
        ApiError::NotFound
    })?;
    admit(&state.limits, Scope::Wallet, entry.wallet.as_str()).await?;

    match state.pipeline.process(entry_id, Some(proof.clone()), Utc::now()).await {
        Ok(PipelineOutcome::Confirmed { entry, fresh }) => {
            info!(entry_id = %entry.id, fresh, "verify confirmed");
            Ok(Json(json!({
                "success": true,
                "entryId": entry.id,
                "proof": proof,
            }))
            .into_response())
        }
        Ok(PipelineOutcome::Pending { reason }) => {
            info!(entry_id = %entry_id, %reason, "verify pending");
            Ok((StatusCode::ACCEPTED, Json(json!({ "success": false, "status": "pending" }))).into_response())
        }
        Ok(PipelineOutcome::Rejected { reason }) => {
            warn!(entry_id = %entry_id, %reason, "verify rejected");
            Err(ApiError::BadRequest)
        }
        Ok(PipelineOutcome::Busy) => Err(ApiError::TooManyRequests {
            retry_after_secs: BUSY_RETRY_SECS,
        }),
        Err(e) => Err(pipeline_error(&entry_id, e)),
    }
}

pub async fn select_winner_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let req: SelectWinnerRequest = decode(&body)?;
    let raffle_id: RaffleId = req.raffle_id.parse().map_err(|_| ApiError::BadRequest)?;

    let action = if req.force_override {
        Action::ForceDraw { raffle: raffle_id }
    } else {
        Action::SelectWinner { raffle: raffle_id }
    };
    authorize(&state, &headers, &action).await?;

    let outcome = state
        .selector
        .select(&raffle_id, req.force_override, Utc::now())
        .await
        .map_err(|e| match e {
            DrawError::RaffleNotFound(_) => ApiError::NotFound,
            e => {
                error!(raffle_id = %raffle_id, error = %e, "draw failed");
                ApiError::Internal
            }
        })?;

    let status = if outcome.winner().is_some() {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    info!(raffle_id = %raffle_id, reason = outcome.reason(), force = req.force_override, "select-winner");
    Ok((
        status,
        Json(json!({
            "success": outcome.winner().is_some(),
            "winnerWallet": outcome.winner(),
            "reason": outcome.reason(),
            "detail": outcome,
        })),
    )
        .into_response())
}

pub async fn create_entry_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let ip = client_ip(&headers, connect, state.config.server.trust_forwarded_for);
    admit(&state.limits, Scope::Ip, &ip).await?;

    let req: CreateEntryRequest = decode(&body)?;
    let raffle_id: RaffleId = req.raffle_id.parse().map_err(|_| ApiError::BadRequest)?;
    let wallet = WalletAddress::parse(&req.wallet).map_err(|_| ApiError::BadRequest)?;
    admit(&state.limits, Scope::Wallet, wallet.as_str()).await?;

    let snapshot = state.store.snapshot(&raffle_id).await?.ok_or(ApiError::NotFound)?;
    let now = Utc::now();
    if !snapshot.raffle.is_open(now) {
        warn!(raffle_id = %raffle_id, "entry for closed raffle");
        return Err(ApiError::BadRequest);
    }
    if let Some(remaining) = snapshot.raffle.remaining_tickets(snapshot.confirmed_tickets()) {
        if u64::from(req.ticket_quantity) > remaining {
            warn!(raffle_id = %raffle_id, requested = req.ticket_quantity, remaining, "entry exceeds remaining tickets");
            return Err(ApiError::BadRequest);
        }
    }

    let entry = Entry::new(&snapshot.raffle, wallet, req.ticket_quantity, now).map_err(|e| {
        warn!(raffle_id = %raffle_id, error = %e, "entry rejected");
        ApiError::BadRequest
    })?;
    state.store.insert_entry(&entry).await?;
    info!(entry_id = %entry.id, raffle_id = %raffle_id, tickets = entry.ticket_quantity, "entry created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "entryId": entry.id,
            "amount": entry.amount,
            "currency": entry.currency,
        })),
    )
        .into_response())
}

pub async fn create_raffle_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    authorize(&state, &headers, &Action::RegisterRaffle).await?;
    let req: CreateRaffleRequest = decode(&body)?;

    let start = req.start_time.unwrap_or_else(Utc::now);
    let accepted = &state.pipeline.verifier().config().accepted_currencies;
    let bounds_ok = match (req.min_tickets, req.max_tickets) {
        (Some(min), Some(max)) => min <= max,
        (_, Some(0)) => false,
        _ => true,
    };
    if req.title.trim().is_empty()
        || req.ticket_price <= Decimal::ZERO
        || req.end_time <= start
        || !accepted.contains(&req.currency)
        || !bounds_ok
    {
        warn!(title = %req.title, "raffle registration refused");
        return Err(ApiError::BadRequest);
    }

    let mut raffle = Raffle::new(req.title, req.ticket_price, req.currency, start, req.end_time);
    raffle.max_tickets = req.max_tickets;
    raffle.min_tickets = req.min_tickets;
    state.store.insert_raffle(&raffle).await?;
    info!(raffle_id = %raffle.id, "raffle registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "raffleId": raffle.id })),
    )
        .into_response())
}

pub async fn trust_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let raffle_id: RaffleId = id.parse().map_err(|_| ApiError::BadRequest)?;
    let snapshot = state.store.snapshot(&raffle_id).await?.ok_or(ApiError::NotFound)?;
    let score = trust_score(&snapshot.raffle, &snapshot.entries);
    Ok(Json(json!({
        "success": true,
        "raffleId": raffle_id,
        "trust": score,
    })))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "malformed request body");
        ApiError::BadRequest
    })
}

/// Client address used as the IP rate-limit key.
fn client_ip(headers: &HeaderMap, connect: Option<ConnectInfo<SocketAddr>>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn admit(limits: &RateLimits, scope: Scope, key: &str) -> ApiResult<()> {
    let decision = limits.check(scope, key).await?;
    if decision.allowed {
        return Ok(());
    }
    warn!(scope = scope.prefix(), key, "rate limited");
    Err(ApiError::TooManyRequests {
        retry_after_secs: decision.retry_after_secs(),
    })
}

async fn authorize(state: &AppState, headers: &HeaderMap, action: &Action) -> ApiResult<()> {
    let identity = state.auth.authenticate(&Credentials::from_headers(headers)).await;
    if state.auth.authorize(&identity, action).await {
        return Ok(());
    }
    warn!(identity = %identity.name, %action, "admin action refused");
    Err(if identity.is_admin {
        ApiError::Forbidden
    } else {
        ApiError::Unauthorized
    })
}

fn pipeline_error(entry_id: &EntryId, e: PipelineError) -> ApiError {
    match e {
        PipelineError::EntryNotFound(_) | PipelineError::RaffleNotFound(_) => {
            warn!(entry_id = %entry_id, error = %e, "verify target missing");
            ApiError::NotFound
        }
        PipelineError::Conflict(_) | PipelineError::MissingProof(_) => {
            warn!(entry_id = %entry_id, error = %e, "verify refused");
            ApiError::BadRequest
        }
        PipelineError::Unavailable(_)
        | PipelineError::Commit(_)
        | PipelineError::Store(_)
        | PipelineError::Guard(_) => {
            error!(entry_id = %entry_id, error = %e, "verify failed");
            ApiError::Internal
        }
    }
}
