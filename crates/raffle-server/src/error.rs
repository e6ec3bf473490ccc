use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("guard backend error: {0}")]
    Guard(#[from] raffle_guard::GuardError),

    #[error("store error: {0}")]
    Store(#[from] raffle_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Client-facing failure.
///
/// Every variant renders the same body shape carrying only the status
/// reason phrase. Callers log the cause before converting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiError {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    TooManyRequests { retry_after_secs: u64 },
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "success": false,
            "error": status.canonical_reason().unwrap_or("error"),
        }));
        let mut response = (status, body).into_response();
        if let Self::TooManyRequests { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<raffle_guard::GuardError> for ApiError {
    fn from(e: raffle_guard::GuardError) -> Self {
        tracing::error!(error = %e, "guard backend failed");
        Self::Internal
    }
}

impl From<raffle_store::StoreError> for ApiError {
    fn from(e: raffle_store::StoreError) -> Self {
        tracing::error!(error = %e, "store failed");
        Self::Internal
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
