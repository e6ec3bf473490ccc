use thiserror::Error;

/// Errors produced by type construction and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid base58 string: {0}")]
    InvalidBase58(String),

    #[error("invalid length: expected {min}..={max} characters, got {actual}")]
    InvalidLength { min: usize, max: usize, actual: usize },

    #[error("decoded to {actual} bytes, expected {expected}")]
    InvalidByteLength { expected: usize, actual: usize },

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("ticket quantity must be positive")]
    ZeroQuantity,

    #[error("amount overflow")]
    AmountOverflow,
}
