/// Errors from ledger access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("ledger endpoint not configured")]
    Misconfigured,

    #[error("ledger request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed ledger response: {0}")]
    Decode(String),
}

impl ChainError {
    /// Whether asking again later could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Misconfigured)
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Result alias for ledger operations.
pub type ChainResult<T> = Result<T, ChainError>;
