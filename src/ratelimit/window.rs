//! Fixed-window counter state.

use serde::{Deserialize, Serialize};

/// Version written into every persisted record.
pub const RECORD_VERSION: u8 = 1;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Longest accepted window: one year.
pub const MAX_WINDOW_SECS: u64 = 366 * 86_400;

/// Counter state for one rate-limited key.
///
/// Persisted as `{"t": <window start>, "c": <count>}`. Records written by
/// this crate also carry `"v"`; records without it are read as version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    /// Unix timestamp (seconds) at which the current window began
    #[serde(rename = "t")]
    pub window_start: i64,
    /// Requests observed since `window_start`
    #[serde(rename = "c")]
    pub count: u64,
    /// Record format version
    #[serde(rename = "v", default = "default_version")]
    pub version: u8,
}

fn default_version() -> u8 {
    RECORD_VERSION
}

/// How a check moved a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No previous record for the key
    Opened,
    /// The previous window had expired and was replaced
    Reset,
    /// The request was counted against the current window
    Counted,
}

impl RateWindow {
    /// A window opened at `now` holding one request.
    pub fn open(now: i64) -> Self {
        Self {
            window_start: now,
            count: 1,
            version: RECORD_VERSION,
        }
    }

    /// Whether the window has expired at `now`.
    ///
    /// The window is inclusive of its last second: a check exactly
    /// `window_secs` after the start still belongs to it.
    pub fn is_expired(&self, now: i64, window_secs: u64) -> bool {
        now.saturating_sub(self.window_start) > window_len(window_secs)
    }

    /// Apply one request at `now` to an optional previous window.
    pub fn advance(previous: Option<RateWindow>, now: i64, window_secs: u64) -> (Self, Transition) {
        match previous {
            None => (Self::open(now), Transition::Opened),
            Some(window) if window.is_expired(now, window_secs) => {
                (Self::open(now), Transition::Reset)
            }
            Some(window) => (
                Self {
                    count: window.count.saturating_add(1),
                    version: RECORD_VERSION,
                    ..window
                },
                Transition::Counted,
            ),
        }
    }

    /// Seconds until a check would open a fresh window.
    pub fn retry_after(&self, now: i64, window_secs: u64) -> u64 {
        let reopens_at = self
            .window_start
            .saturating_add(window_len(window_secs))
            .saturating_add(1);
        reopens_at.saturating_sub(now).max(0) as u64
    }
}

fn window_len(window_secs: u64) -> i64 {
    i64::try_from(window_secs).unwrap_or(i64::MAX)
}
