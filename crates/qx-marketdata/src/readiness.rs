//! Readiness gate — the last check before a bar may drive trading.
//!
//! The normalizer guarantees a clean sequence at ingest; the gate
//! re-asserts the execution-critical invariants at the engine boundary so
//! a misbehaving source (or a bug upstream) halts the run instead of
//! feeding a strategy bad data:
//!
//! - the bar is closed
//! - per-symbol close times are strictly increasing
//! - adjacent bars are whole steps apart (exactly one step within a
//!   contiguous segment; gaps are admitted but surfaced)

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use qx_schemas::Bar;

use crate::normalizer::GapEvent;

/// Why a bar was refused at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    /// Only closed bars may reach execution.
    NotClosed { symbol: String, ts: DateTime<Utc> },
    /// Close time did not advance for this symbol.
    NonMonotonic {
        symbol: String,
        ts: DateTime<Utc>,
        last_ts: DateTime<Utc>,
    },
    /// The delta to the previous bar is not a whole number of steps.
    Misaligned {
        symbol: String,
        ts: DateTime<Utc>,
        last_ts: DateTime<Utc>,
        delta_secs: i64,
    },
}

impl fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessError::NotClosed { symbol, ts } => {
                write!(f, "bar not closed: {symbol} @ {ts}")
            }
            ReadinessError::NonMonotonic {
                symbol,
                ts,
                last_ts,
            } => write!(
                f,
                "non-monotonic bar for {symbol}: {ts} is not after {last_ts}"
            ),
            ReadinessError::Misaligned {
                symbol,
                ts,
                last_ts,
                delta_secs,
            } => write!(
                f,
                "misaligned bar for {symbol}: {last_ts} -> {ts} is {delta_secs}s, not a whole step"
            ),
        }
    }
}

impl std::error::Error for ReadinessError {}

/// Result of admitting a bar: clean, or clean-with-a-gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub gap: Option<GapEvent>,
}

/// Stateful per-symbol gate.  One instance per engine run.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    last_ts: BTreeMap<String, DateTime<Utc>>,
    gap_count: u64,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total gaps admitted so far.
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// Check a bar and advance the per-symbol watermark on success.
    pub fn admit(&mut self, bar: &Bar) -> Result<Admission, ReadinessError> {
        if !bar.is_closed {
            return Err(ReadinessError::NotClosed {
                symbol: bar.symbol.clone(),
                ts: bar.ts,
            });
        }

        let step = bar.timeframe.secs();
        let mut gap = None;

        if let Some(&last_ts) = self.last_ts.get(&bar.symbol) {
            let delta = (bar.ts - last_ts).num_seconds();
            if delta <= 0 {
                return Err(ReadinessError::NonMonotonic {
                    symbol: bar.symbol.clone(),
                    ts: bar.ts,
                    last_ts,
                });
            }
            if delta % step != 0 {
                return Err(ReadinessError::Misaligned {
                    symbol: bar.symbol.clone(),
                    ts: bar.ts,
                    last_ts,
                    delta_secs: delta,
                });
            }
            if delta > step {
                self.gap_count += 1;
                gap = Some(GapEvent {
                    symbol: bar.symbol.clone(),
                    prev_ts: last_ts,
                    next_ts: bar.ts,
                    gap_count: delta / step - 1,
                });
            }
        }

        self.last_ts.insert(bar.symbol.clone(), bar.ts);
        Ok(Admission { gap })
    }
}
