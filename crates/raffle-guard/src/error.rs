/// Errors from admission-control backends.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("guard state lock poisoned")]
    Poisoned,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;
