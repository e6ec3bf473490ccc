use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Payment currencies accepted for raffle tickets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// The chain's native asset, settled in lamports.
    Sol,
    /// USD Coin SPL token.
    Usdc,
}

impl Currency {
    pub const USDC_MINT: &'static str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    /// Number of decimal places in the smallest on-chain unit.
    pub fn decimals(&self) -> u32 {
        match self {
            Self::Sol => 9,
            Self::Usdc => 6,
        }
    }

    /// Token mint for SPL currencies, `None` for the native asset.
    pub fn mint(&self) -> Option<&'static str> {
        match self {
            Self::Sol => None,
            Self::Usdc => Some(Self::USDC_MINT),
        }
    }

    pub fn is_native(&self) -> bool {
        self.mint().is_none()
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Sol => "SOL",
            Self::Usdc => "USDC",
        }
    }

    /// Convert a human amount into integer base units using `decimals`,
    /// rounding half away from zero.
    pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<i128, TypeError> {
        let scale = 10i128
            .checked_pow(decimals)
            .and_then(|s| Decimal::try_from_i128_with_scale(s, 0).ok())
            .ok_or(TypeError::AmountOverflow)?;
        amount
            .checked_mul(scale)
            .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_i128())
            .ok_or(TypeError::AmountOverflow)
    }

    /// Convert using this currency's native decimals.
    pub fn base_units(&self, amount: Decimal) -> Result<i128, TypeError> {
        Self::to_base_units(amount, self.decimals())
    }
}

impl FromStr for Currency {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SOL" => Ok(Self::Sol),
            "USDC" => Ok(Self::Usdc),
            other => Err(TypeError::UnsupportedCurrency(other.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
