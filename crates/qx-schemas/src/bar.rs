//! Canonical OHLCV bar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Micros, Timeframe};

/// A one-minute OHLCV bar.  `ts` is the bar **close** time in UTC.
///
/// A bar is only eligible for execution once `is_closed` is true; the
/// normalizer enforces the remaining invariants (per-symbol monotonicity,
/// 60 s spacing within contiguous segments, `(symbol, ts, timeframe)`
/// uniqueness, OHLC sanity).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub open: Micros,
    pub high: Micros,
    pub low: Micros,
    pub close: Micros,
    pub volume: i64,
    pub timeframe: Timeframe,
    pub is_closed: bool,
    pub source: Option<String>,
}

impl Bar {
    /// The canonical uniqueness key `(symbol, ts, timeframe)`.
    pub fn key(&self) -> (&str, DateTime<Utc>, Timeframe) {
        (&self.symbol, self.ts, self.timeframe)
    }

    /// OHLC sanity: `low ≤ min(open, close)` and `high ≥ max(open, close)`.
    pub fn ohlc_sane(&self) -> bool {
        self.low <= self.high
            && self.low <= self.open
            && self.low <= self.close
            && self.high >= self.open
            && self.high >= self.close
    }
}
