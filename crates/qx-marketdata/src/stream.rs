//! Streaming bar normalization with a bounded reorder window.
//!
//! The streaming path cannot sort a whole batch, so it delays emission:
//! a bar is committed only once a newer bar has advanced event time past
//! `reorder_window_secs`.  Late bars inside the window therefore land in
//! the buffer and come out sorted; a bar at or before the committed
//! watermark is unrecoverable and rejected.
//!
//! With a zero window (the default) commitment is immediate and any late
//! bar is an ordering error — the strict mode used by backtests.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use qx_schemas::Bar;

use crate::normalizer::{
    DedupWinner, GapEvent, GapPolicy, NormalizeReport, NormalizerConfig, NormalizerError,
};

// ---------------------------------------------------------------------------
// Per-symbol state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SymbolLane {
    /// Bars seen but not yet committed, ordered by ts.
    pending: BTreeMap<DateTime<Utc>, Bar>,
    /// Close time of the last committed bar.
    watermark: Option<DateTime<Utc>>,
    /// Newest ts observed (drives the commit horizon).
    newest: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// StreamNormalizer
// ---------------------------------------------------------------------------

/// Incremental normalizer for live/streaming ingestion.
///
/// `push` returns the bars that became committable, in order; `finish`
/// drains whatever is still buffered.  Feed it already-parsed [`Bar`]s
/// (use [`crate::parse_bar_row`] at the boundary).
#[derive(Debug)]
pub struct StreamNormalizer {
    cfg: NormalizerConfig,
    lanes: BTreeMap<String, SymbolLane>,
    report: NormalizeReport,
}

impl StreamNormalizer {
    pub fn new(cfg: NormalizerConfig) -> Self {
        Self {
            cfg,
            lanes: BTreeMap::new(),
            report: NormalizeReport::default(),
        }
    }

    /// Counters accumulated so far.
    pub fn report(&self) -> &NormalizeReport {
        &self.report
    }

    /// Offer one bar; returns the bars committed by this push, in order.
    pub fn push(&mut self, bar: Bar) -> Result<Vec<Bar>, NormalizerError> {
        self.report.rows_in += 1;

        if !bar.is_closed {
            self.report.open_bars_dropped += 1;
            return Ok(Vec::new());
        }

        let lane = self.lanes.entry(bar.symbol.clone()).or_default();

        // A bar at or before the watermark can no longer be merged into the
        // committed sequence.
        if let Some(watermark) = lane.watermark {
            if bar.ts <= watermark {
                return Err(NormalizerError::OutOfOrder {
                    symbol: bar.symbol,
                    ts: bar.ts,
                    watermark,
                });
            }
        }

        // Duplicate inside the pending buffer: winner policy applies.
        if let Some(existing) = lane.pending.get_mut(&bar.ts) {
            self.report.duplicates_dropped += 1;
            if self.cfg.dedup_winner == DedupWinner::Last {
                *existing = bar;
            }
            return Ok(Vec::new());
        }

        if lane.newest.map_or(true, |n| bar.ts > n) {
            lane.newest = Some(bar.ts);
        }
        lane.pending.insert(bar.ts, bar.clone());

        let symbol = bar.symbol;
        self.drain_committable(&symbol)
    }

    /// Flush everything still pending, in order.  Call at end of stream.
    pub fn finish(mut self) -> Result<(Vec<Bar>, NormalizeReport), NormalizerError> {
        let mut out = Vec::new();
        let symbols: Vec<String> = self.lanes.keys().cloned().collect();
        for symbol in symbols {
            let lane = self.lanes.get_mut(&symbol).expect("lane exists");
            let pending: Vec<Bar> = std::mem::take(&mut lane.pending).into_values().collect();
            for bar in pending {
                self.commit(&symbol, bar, &mut out)?;
            }
        }
        Ok((out, self.report))
    }

    // Commit every pending bar older than the reorder horizon.
    fn drain_committable(&mut self, symbol: &str) -> Result<Vec<Bar>, NormalizerError> {
        let window = Duration::seconds(self.cfg.reorder_window_secs);
        let lane = self.lanes.get_mut(symbol).expect("lane exists");
        let Some(newest) = lane.newest else {
            return Ok(Vec::new());
        };
        let horizon = newest - window;

        let committable: Vec<DateTime<Utc>> = lane
            .pending
            .range(..=horizon)
            .map(|(ts, _)| *ts)
            .collect();

        let mut out = Vec::new();
        for ts in committable {
            let bar = self
                .lanes
                .get_mut(symbol)
                .expect("lane exists")
                .pending
                .remove(&ts)
                .expect("pending bar exists");
            self.commit(symbol, bar, &mut out)?;
        }
        Ok(out)
    }

    fn commit(
        &mut self,
        symbol: &str,
        bar: Bar,
        out: &mut Vec<Bar>,
    ) -> Result<(), NormalizerError> {
        let lane = self.lanes.get_mut(symbol).expect("lane exists");
        if let Some(prev_ts) = lane.watermark {
            let step = bar.timeframe.secs();
            let delta = (bar.ts - prev_ts).num_seconds();
            if delta > step {
                if self.cfg.gap_policy == GapPolicy::Strict {
                    return Err(NormalizerError::Gap {
                        symbol: symbol.to_string(),
                        prev_ts,
                        next_ts: bar.ts,
                    });
                }
                self.report.gaps.push(GapEvent {
                    symbol: symbol.to_string(),
                    prev_ts,
                    next_ts: bar.ts,
                    gap_count: delta / step - 1,
                });
            }
        }
        lane.watermark = Some(bar.ts);
        self.report.bars_out += 1;
        out.push(bar);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qx_schemas::{Micros, Timeframe};

    fn bar(minute: u32, symbol: &str) -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap(),
            symbol: symbol.to_string(),
            open: Micros::from_units(100),
            high: Micros::from_units(100),
            low: Micros::from_units(100),
            close: Micros::from_units(100),
            volume: 1,
            timeframe: Timeframe::M1,
            is_closed: true,
            source: None,
        }
    }

    #[test]
    fn zero_window_commits_immediately() {
        let mut s = StreamNormalizer::new(NormalizerConfig::default());
        let committed = s.push(bar(1, "AAA")).unwrap();
        assert_eq!(committed.len(), 1);
        let committed = s.push(bar(2, "AAA")).unwrap();
        assert_eq!(committed.len(), 1);
    }

    #[test]
    fn zero_window_rejects_late_bar() {
        let mut s = StreamNormalizer::new(NormalizerConfig::default());
        s.push(bar(3, "AAA")).unwrap();
        let err = s.push(bar(1, "AAA")).unwrap_err();
        assert!(matches!(err, NormalizerError::OutOfOrder { symbol, .. } if symbol == "AAA"));
    }

    #[test]
    fn window_reorders_late_bar() {
        let cfg = NormalizerConfig {
            reorder_window_secs: 120,
            ..Default::default()
        };
        let mut s = StreamNormalizer::new(cfg);
        // 1 then 3 then the late 2: nothing commits until the horizon moves.
        assert!(s.push(bar(1, "AAA")).unwrap().is_empty());
        let committed = s.push(bar(3, "AAA")).unwrap();
        assert_eq!(committed.len(), 1); // minute 1 is now past the horizon
        assert!(s.push(bar(2, "AAA")).unwrap().is_empty());
        let (rest, report) = s.finish().unwrap();
        let minutes: Vec<i64> = rest.iter().map(|b| b.ts.timestamp() / 60 % 60).collect();
        assert_eq!(minutes, vec![2, 3], "late bar comes out sorted");
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn duplicate_in_buffer_respects_winner() {
        let cfg = NormalizerConfig {
            reorder_window_secs: 300,
            ..Default::default()
        };
        let mut s = StreamNormalizer::new(cfg);
        let mut a = bar(1, "AAA");
        a.volume = 1;
        let mut b = bar(1, "AAA");
        b.volume = 2;
        s.push(a).unwrap();
        s.push(b).unwrap();
        let (bars, report) = s.finish().unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, 2, "winner=last keeps the later arrival");
        assert_eq!(report.duplicates_dropped, 1);
    }

    #[test]
    fn gap_recorded_on_commit() {
        let mut s = StreamNormalizer::new(NormalizerConfig::default());
        s.push(bar(1, "AAA")).unwrap();
        s.push(bar(4, "AAA")).unwrap();
        let (_, report) = s.finish().unwrap();
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].gap_count, 2);
    }

    #[test]
    fn strict_gap_errors_on_commit() {
        let cfg = NormalizerConfig {
            gap_policy: GapPolicy::Strict,
            ..Default::default()
        };
        let mut s = StreamNormalizer::new(cfg);
        s.push(bar(1, "AAA")).unwrap();
        assert!(matches!(
            s.push(bar(3, "AAA")),
            Err(NormalizerError::Gap { .. })
        ));
    }

    #[test]
    fn open_bar_never_commits() {
        let mut s = StreamNormalizer::new(NormalizerConfig::default());
        let mut b = bar(1, "AAA");
        b.is_closed = false;
        assert!(s.push(b).unwrap().is_empty());
        let (bars, report) = s.finish().unwrap();
        assert!(bars.is_empty());
        assert_eq!(report.open_bars_dropped, 1);
    }

    #[test]
    fn symbols_are_independent() {
        let mut s = StreamNormalizer::new(NormalizerConfig::default());
        s.push(bar(5, "AAA")).unwrap();
        // BBB at minute 1 is fine; watermarks are per symbol.
        assert_eq!(s.push(bar(1, "BBB")).unwrap().len(), 1);
    }
}
