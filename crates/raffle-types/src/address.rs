use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn validate_base58(s: &str, min: usize, max: usize, bytes: usize) -> Result<(), TypeError> {
    if s.len() < min || s.len() > max {
        return Err(TypeError::InvalidLength {
            min,
            max,
            actual: s.len(),
        });
    }
    if let Some(bad) = s.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(TypeError::InvalidBase58(format!("unexpected character {bad:?}")));
    }
    let decoded = bs58::decode(s)
        .into_vec()
        .map_err(|e| TypeError::InvalidBase58(e.to_string()))?;
    if decoded.len() != bytes {
        return Err(TypeError::InvalidByteLength {
            expected: bytes,
            actual: decoded.len(),
        });
    }
    Ok(())
}

/// A base58-encoded 32-byte account address.
///
/// Parsing decodes the string and requires exactly 32 bytes. The ledger is the
/// authority on whether the account exists.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub const MIN_LEN: usize = 32;
    pub const MAX_LEN: usize = 44;
    pub const BYTES: usize = 32;

    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let s = s.trim();
        validate_base58(s, Self::MIN_LEN, Self::MAX_LEN, Self::BYTES)?;
        Ok(Self(s.to_string()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs (`AbCd…WxYz`).
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..4], &self.0[self.0.len() - 4..])
    }
}

impl FromStr for WalletAddress {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.short())
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A base58-encoded 64-byte transaction signature offered as payment proof.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxSignature(String);

impl TxSignature {
    pub const MIN_LEN: usize = 64;
    pub const MAX_LEN: usize = 88;
    pub const BYTES: usize = 64;

    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let s = s.trim();
        validate_base58(s, Self::MIN_LEN, Self::MAX_LEN, Self::BYTES)?;
        Ok(Self(s.to_string()))
    }

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, enough to correlate log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl FromStr for TxSignature {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TxSignature {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxSignature> for String {
    fn from(value: TxSignature) -> Self {
        value.0
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({}…)", self.short())
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
