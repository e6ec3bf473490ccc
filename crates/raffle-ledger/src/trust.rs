use std::collections::HashSet;

use raffle_types::{Entry, Raffle};
use serde::Serialize;

const VERIFIED_WEIGHT: f64 = 60.0;
const DIVERSITY_WEIGHT: f64 = 30.0;
const INTEGRITY_CLEAN: f64 = 10.0;
const INTEGRITY_EDITED: f64 = 5.0;

/// A raffle's trust score and the components it is built from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScore {
    /// Rounded total, `0..=100`.
    pub score: u8,
    pub verified_ratio: f64,
    pub diversity_ratio: f64,
    pub verified_points: f64,
    pub diversity_points: f64,
    pub integrity_points: f64,
    pub total_entries: usize,
    pub confirmed_entries: usize,
    pub unique_wallets: usize,
}

/// Score `raffle` from its entries. Pure; recompute whenever needed.
pub fn trust_score(raffle: &Raffle, entries: &[Entry]) -> TrustScore {
    let total = entries.len();
    let confirmed: Vec<&Entry> = entries.iter().filter(|e| e.is_confirmed()).collect();
    let unique_wallets = confirmed
        .iter()
        .map(|e| &e.wallet)
        .collect::<HashSet<_>>()
        .len();

    let verified_ratio = ratio(confirmed.len(), total);
    let diversity_ratio = ratio(unique_wallets, confirmed.len());
    let verified_points = (verified_ratio * VERIFIED_WEIGHT).min(VERIFIED_WEIGHT);
    let diversity_points = (diversity_ratio * DIVERSITY_WEIGHT).min(DIVERSITY_WEIGHT);
    let integrity_points = if raffle.edited_after_entries {
        INTEGRITY_EDITED
    } else {
        INTEGRITY_CLEAN
    };

    let sum = verified_points + diversity_points + integrity_points;
    TrustScore {
        score: sum.round().clamp(0.0, 100.0) as u8,
        verified_ratio,
        diversity_ratio,
        verified_points,
        diversity_points,
        integrity_points,
        total_entries: total,
        confirmed_entries: confirmed.len(),
        unique_wallets,
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
