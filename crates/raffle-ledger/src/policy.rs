use chrono::Duration;
use serde::{Deserialize, Serialize};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Rules for when a raffle may be drawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawPolicy {
    /// How far an under-subscribed raffle's end is pushed out.
    pub extension_window_secs: u64,
    /// Delay after the original scheduled end before a draw is allowed.
    pub waiting_period_secs: u64,
    /// Stop extending after this many extensions. Unbounded when unset.
    pub max_extensions: Option<u32>,
}

impl Default for DrawPolicy {
    fn default() -> Self {
        Self {
            extension_window_secs: 7 * DAY_SECS,
            waiting_period_secs: DAY_SECS,
            max_extensions: None,
        }
    }
}

impl DrawPolicy {
    pub fn extension_window(&self) -> Duration {
        secs(self.extension_window_secs)
    }

    pub fn waiting_period(&self) -> Duration {
        secs(self.waiting_period_secs)
    }

    /// Whether a raffle extended `count` times may be extended again.
    pub fn may_extend(&self, count: u32) -> bool {
        self.max_extensions.map_or(true, |max| count < max)
    }
}

fn secs(s: u64) -> Duration {
    let s = i64::try_from(s).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    Duration::seconds(s)
}
