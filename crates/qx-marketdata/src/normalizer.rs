//! Canonical bar normalization (batch path).
//!
//! Converts raw provider rows into canonical [`Bar`]s sorted by
//! `(symbol, ts)` with duplicates resolved, gaps annotated, and every
//! schema invariant enforced.  It does **not**:
//! - fetch data (no providers; see `csv_source.rs`)
//! - gate execution readiness (that is `readiness.rs`)
//! - handle live reordering (that is `stream.rs`)

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use qx_schemas::{truncate_micros, Bar, Micros, Timeframe};

// ---------------------------------------------------------------------------
// Raw input row
// ---------------------------------------------------------------------------

/// A bar row exactly as a data source hands it over.
///
/// Prices are decimal strings so micro conversion happens once, here,
/// deterministically.  The timestamp is an RFC-3339 string; naive (offset
/// free) timestamps are rejected rather than assumed UTC.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawBarRow {
    pub timestamp: String,
    pub symbol: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: i64,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_is_closed")]
    pub is_closed: bool,
    #[serde(default)]
    pub source: Option<String>,
}

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_is_closed() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizerError {
    /// Missing column, unparseable value, OHLC violation, or negative
    /// volume: the row does not satisfy the bar schema.
    Schema { field: &'static str, detail: String },
    /// The timestamp carries no UTC offset.  Assuming a zone would make
    /// bar identity depend on the producer's locale, so it is rejected.
    NaiveTimestamp { raw: String },
    /// Streaming mode: a bar at or before the committed watermark arrived
    /// outside the reorder window.
    OutOfOrder {
        symbol: String,
        ts: DateTime<Utc>,
        watermark: DateTime<Utc>,
    },
    /// Strict gap policy: adjacent bars more than one step apart.
    Gap {
        symbol: String,
        prev_ts: DateTime<Utc>,
        next_ts: DateTime<Utc>,
    },
}

impl fmt::Display for NormalizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizerError::Schema { field, detail } => {
                write!(f, "bar schema violation in '{field}': {detail}")
            }
            NormalizerError::NaiveTimestamp { raw } => {
                write!(f, "naive timestamp rejected (no UTC offset): '{raw}'")
            }
            NormalizerError::OutOfOrder {
                symbol,
                ts,
                watermark,
            } => write!(
                f,
                "out-of-order bar for {symbol}: ts={ts} is at or before committed watermark {watermark}"
            ),
            NormalizerError::Gap {
                symbol,
                prev_ts,
                next_ts,
            } => write!(
                f,
                "gap rejected for {symbol}: {prev_ts} -> {next_ts} exceeds one bar step"
            ),
        }
    }
}

impl std::error::Error for NormalizerError {}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which record wins when two rows share `(symbol, ts, timeframe)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DedupWinner {
    /// The occurrence latest in input order wins (corrections overwrite).
    #[default]
    Last,
    /// The first occurrence wins (later duplicates are echoes).
    First,
}

/// What to do when adjacent bars are more than one step apart.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum GapPolicy {
    /// Annotate the gap and continue.  No synthetic bar is manufactured.
    #[default]
    Never,
    /// Reject the batch/stream on the first gap.
    Strict,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizerConfig {
    pub reorder_window_secs: i64,
    pub gap_policy: GapPolicy,
    pub dedup_winner: DedupWinner,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            reorder_window_secs: 0,
            gap_policy: GapPolicy::Never,
            dedup_winner: DedupWinner::Last,
        }
    }
}

// ---------------------------------------------------------------------------
// Gap metadata
// ---------------------------------------------------------------------------

/// A detected gap between adjacent bars of one symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GapEvent {
    pub symbol: String,
    pub prev_ts: DateTime<Utc>,
    pub next_ts: DateTime<Utc>,
    /// Number of whole missing bars between the two timestamps.
    pub gap_count: i64,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Counters and issue lists for one normalization pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub rows_in: usize,
    pub bars_out: usize,
    pub duplicates_dropped: usize,
    pub open_bars_dropped: usize,
    pub gaps: Vec<GapEvent>,
}

impl NormalizeReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates_dropped == 0 && self.open_bars_dropped == 0 && self.gaps.is_empty()
    }
}

/// Canonical bars plus the quality report for the pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizeOutput {
    pub bars: Vec<Bar>,
    pub report: NormalizeReport,
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

fn parse_price(s: &str, field: &'static str) -> Result<Micros, NormalizerError> {
    Micros::parse_decimal(s).map_err(|e| NormalizerError::Schema {
        field,
        detail: e.to_string(),
    })
}

/// Parse an RFC-3339 timestamp, rejecting naive values explicitly.
pub fn parse_utc_timestamp(raw: &str) -> Result<DateTime<Utc>, NormalizerError> {
    let trimmed = raw.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(dt) => Ok(truncate_micros(dt.with_timezone(&Utc))),
        Err(_) => {
            // Distinguish "naive but otherwise valid" from garbage so the
            // producer gets an actionable error.
            let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"));
            if naive.is_ok() {
                Err(NormalizerError::NaiveTimestamp {
                    raw: trimmed.to_string(),
                })
            } else {
                Err(NormalizerError::Schema {
                    field: "timestamp",
                    detail: format!("not an RFC-3339 timestamp: '{trimmed}'"),
                })
            }
        }
    }
}

/// Parse and validate a single raw row into a canonical [`Bar`].
pub fn parse_bar_row(row: &RawBarRow) -> Result<Bar, NormalizerError> {
    if row.symbol.trim().is_empty() {
        return Err(NormalizerError::Schema {
            field: "symbol",
            detail: "symbol must not be empty".to_string(),
        });
    }

    let ts = parse_utc_timestamp(&row.timestamp)?;
    let timeframe = Timeframe::parse(&row.timeframe).map_err(|e| NormalizerError::Schema {
        field: "timeframe",
        detail: e.to_string(),
    })?;

    let open = parse_price(&row.open, "open")?;
    let high = parse_price(&row.high, "high")?;
    let low = parse_price(&row.low, "low")?;
    let close = parse_price(&row.close, "close")?;

    if row.volume < 0 {
        return Err(NormalizerError::Schema {
            field: "volume",
            detail: format!("volume must be >= 0, got {}", row.volume),
        });
    }

    let bar = Bar {
        ts,
        symbol: row.symbol.trim().to_string(),
        open,
        high,
        low,
        close,
        volume: row.volume,
        timeframe,
        is_closed: row.is_closed,
        source: row.source.clone(),
    };

    if !bar.ohlc_sane() {
        return Err(NormalizerError::Schema {
            field: "ohlc",
            detail: format!(
                "low ({}) / high ({}) do not bound open ({}) / close ({})",
                bar.low, bar.high, bar.open, bar.close
            ),
        });
    }

    Ok(bar)
}

// ---------------------------------------------------------------------------
// Batch normalization
// ---------------------------------------------------------------------------

/// Normalize a batch of raw rows into canonical, `(symbol, ts)`-sorted bars.
///
/// Deterministic: the stable sort preserves input order among duplicates,
/// which is what gives [`DedupWinner`] its meaning.  Open (`is_closed ==
/// false`) bars are dropped and counted; they never reach an engine.
pub fn normalize_batch(
    rows: &[RawBarRow],
    cfg: &NormalizerConfig,
) -> Result<NormalizeOutput, NormalizerError> {
    let mut report = NormalizeReport {
        rows_in: rows.len(),
        ..Default::default()
    };

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let bar = parse_bar_row(row)?;
        if !bar.is_closed {
            report.open_bars_dropped += 1;
            continue;
        }
        bars.push(bar);
    }

    // Stable sort: input order survives within equal keys.
    bars.sort_by(|a, b| {
        a.symbol
            .cmp(&b.symbol)
            .then_with(|| a.ts.cmp(&b.ts))
            .then_with(|| a.timeframe.cmp(&b.timeframe))
    });

    // Dedup by (symbol, ts, timeframe).  With stable ordering the run of
    // duplicates is contiguous; keep the first or last of each run.
    let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match deduped.last_mut() {
            Some(prev)
                if prev.symbol == bar.symbol
                    && prev.ts == bar.ts
                    && prev.timeframe == bar.timeframe =>
            {
                report.duplicates_dropped += 1;
                if cfg.dedup_winner == DedupWinner::Last {
                    *prev = bar;
                }
            }
            _ => deduped.push(bar),
        }
    }

    // Gap scan per symbol.
    let mut last_by_symbol: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    for bar in &deduped {
        let step = bar.timeframe.secs();
        if let Some(&prev_ts) = last_by_symbol.get(bar.symbol.as_str()) {
            let delta = (bar.ts - prev_ts).num_seconds();
            if delta > step {
                if cfg.gap_policy == GapPolicy::Strict {
                    return Err(NormalizerError::Gap {
                        symbol: bar.symbol.clone(),
                        prev_ts,
                        next_ts: bar.ts,
                    });
                }
                report.gaps.push(GapEvent {
                    symbol: bar.symbol.clone(),
                    prev_ts,
                    next_ts: bar.ts,
                    gap_count: delta / step - 1,
                });
            }
        }
        last_by_symbol.insert(bar.symbol.as_str(), bar.ts);
    }

    report.bars_out = deduped.len();
    Ok(NormalizeOutput {
        bars: deduped,
        report,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, symbol: &str, close: &str) -> RawBarRow {
        RawBarRow {
            timestamp: ts.to_string(),
            symbol: symbol.to_string(),
            open: close.to_string(),
            high: close.to_string(),
            low: close.to_string(),
            close: close.to_string(),
            volume: 10,
            timeframe: "1m".to_string(),
            is_closed: true,
            source: None,
        }
    }

    #[test]
    fn parse_valid_row() {
        let bar = parse_bar_row(&row("2026-01-01T00:01:00Z", "BTC-USD", "100.5")).unwrap();
        assert_eq!(bar.symbol, "BTC-USD");
        assert_eq!(bar.close, Micros::new(100_500_000));
        assert!(bar.is_closed);
    }

    #[test]
    fn naive_timestamp_rejected() {
        let err = parse_bar_row(&row("2026-01-01T00:01:00", "BTC-USD", "100")).unwrap_err();
        assert!(matches!(err, NormalizerError::NaiveTimestamp { raw } if raw == "2026-01-01T00:01:00"));
    }

    #[test]
    fn garbage_timestamp_is_schema_error() {
        let err = parse_bar_row(&row("yesterday", "BTC-USD", "100")).unwrap_err();
        assert!(matches!(
            err,
            NormalizerError::Schema {
                field: "timestamp",
                ..
            }
        ));
    }

    #[test]
    fn non_1m_timeframe_rejected() {
        let mut r = row("2026-01-01T00:01:00Z", "BTC-USD", "100");
        r.timeframe = "5m".to_string();
        let err = parse_bar_row(&r).unwrap_err();
        assert!(matches!(
            err,
            NormalizerError::Schema {
                field: "timeframe",
                ..
            }
        ));
    }

    #[test]
    fn bad_price_rejected_with_field() {
        let mut r = row("2026-01-01T00:01:00Z", "BTC-USD", "100");
        r.high = "NaN".to_string();
        let err = parse_bar_row(&r).unwrap_err();
        assert!(matches!(err, NormalizerError::Schema { field: "high", .. }));
    }

    #[test]
    fn negative_volume_rejected() {
        let mut r = row("2026-01-01T00:01:00Z", "BTC-USD", "100");
        r.volume = -1;
        assert!(matches!(
            parse_bar_row(&r),
            Err(NormalizerError::Schema { field: "volume", .. })
        ));
    }

    #[test]
    fn ohlc_violation_rejected() {
        let mut r = row("2026-01-01T00:01:00Z", "BTC-USD", "100");
        r.low = "101".to_string(); // low above close
        assert!(matches!(
            parse_bar_row(&r),
            Err(NormalizerError::Schema { field: "ohlc", .. })
        ));
    }

    #[test]
    fn batch_sorts_by_symbol_then_ts() {
        let rows = vec![
            row("2026-01-01T00:02:00Z", "BBB", "2"),
            row("2026-01-01T00:01:00Z", "AAA", "1"),
            row("2026-01-01T00:02:00Z", "AAA", "1"),
        ];
        let out = normalize_batch(&rows, &NormalizerConfig::default()).unwrap();
        let keys: Vec<(&str, i64)> = out
            .bars
            .iter()
            .map(|b| (b.symbol.as_str(), b.ts.timestamp()))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(out.bars[0].symbol, "AAA");
    }

    #[test]
    fn dedup_winner_last_keeps_latest_input_occurrence() {
        let mut first = row("2026-01-01T00:01:00Z", "AAA", "1");
        first.volume = 1;
        let mut second = row("2026-01-01T00:01:00Z", "AAA", "2");
        second.volume = 2;
        let out = normalize_batch(
            &[first.clone(), second.clone()],
            &NormalizerConfig::default(),
        )
        .unwrap();
        assert_eq!(out.bars.len(), 1);
        assert_eq!(out.bars[0].volume, 2);
        assert_eq!(out.report.duplicates_dropped, 1);

        let cfg_first = NormalizerConfig {
            dedup_winner: DedupWinner::First,
            ..Default::default()
        };
        let out = normalize_batch(&[first, second], &cfg_first).unwrap();
        assert_eq!(out.bars[0].volume, 1);
    }

    #[test]
    fn dedup_is_idempotent_over_repeated_application() {
        let rows = vec![
            row("2026-01-01T00:01:00Z", "AAA", "1"),
            row("2026-01-01T00:01:00Z", "AAA", "2"),
            row("2026-01-01T00:02:00Z", "AAA", "3"),
        ];
        for winner in [DedupWinner::Last, DedupWinner::First] {
            let cfg = NormalizerConfig {
                dedup_winner: winner,
                ..Default::default()
            };
            let once = normalize_batch(&rows, &cfg).unwrap();
            // Re-feed the already-deduped bars as rows.
            let rerows: Vec<RawBarRow> = once
                .bars
                .iter()
                .map(|b| RawBarRow {
                    timestamp: b.ts.to_rfc3339(),
                    symbol: b.symbol.clone(),
                    open: b.open.to_string(),
                    high: b.high.to_string(),
                    low: b.low.to_string(),
                    close: b.close.to_string(),
                    volume: b.volume,
                    timeframe: b.timeframe.to_string(),
                    is_closed: b.is_closed,
                    source: b.source.clone(),
                })
                .collect();
            let twice = normalize_batch(&rerows, &cfg).unwrap();
            assert_eq!(once.bars, twice.bars, "{winner:?} must be idempotent");
        }
    }

    #[test]
    fn gap_annotated_but_not_fabricated() {
        let rows = vec![
            row("2026-01-01T00:01:00Z", "AAA", "1"),
            row("2026-01-01T00:04:00Z", "AAA", "2"),
        ];
        let out = normalize_batch(&rows, &NormalizerConfig::default()).unwrap();
        assert_eq!(out.bars.len(), 2, "no synthetic bars");
        assert_eq!(out.report.gaps.len(), 1);
        assert_eq!(out.report.gaps[0].gap_count, 2);
    }

    #[test]
    fn strict_gap_policy_rejects() {
        let rows = vec![
            row("2026-01-01T00:01:00Z", "AAA", "1"),
            row("2026-01-01T00:03:00Z", "AAA", "2"),
        ];
        let cfg = NormalizerConfig {
            gap_policy: GapPolicy::Strict,
            ..Default::default()
        };
        assert!(matches!(
            normalize_batch(&rows, &cfg),
            Err(NormalizerError::Gap { .. })
        ));
    }

    #[test]
    fn open_bars_are_dropped_and_counted() {
        let mut r = row("2026-01-01T00:01:00Z", "AAA", "1");
        r.is_closed = false;
        let out = normalize_batch(&[r], &NormalizerConfig::default()).unwrap();
        assert!(out.bars.is_empty());
        assert_eq!(out.report.open_bars_dropped, 1);
        assert!(!out.report.is_clean());
    }

    #[test]
    fn gaps_do_not_cross_symbols() {
        let rows = vec![
            row("2026-01-01T00:01:00Z", "AAA", "1"),
            row("2026-01-01T00:05:00Z", "BBB", "2"),
        ];
        let out = normalize_batch(&rows, &NormalizerConfig::default()).unwrap();
        assert!(out.report.gaps.is_empty());
    }
}
