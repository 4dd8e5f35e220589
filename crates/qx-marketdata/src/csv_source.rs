//! File-backed bar source.
//!
//! Reads OHLCV bars from a CSV file with the canonical column layout
//! (`timestamp,symbol,open,high,low,close,volume[,timeframe,is_closed,source]`)
//! — the file analogue of the parquet bar store, used for backtests and
//! fixtures.  Rows pass through the same row parser as every other source,
//! so schema and timezone violations surface identically.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use qx_ports::{BarDataSource, BarStream, DataSourceError};
use qx_schemas::{Bar, Timeframe};

use crate::normalizer::{parse_bar_row, RawBarRow};

/// CSV-backed implementation of [`BarDataSource`].
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    path: PathBuf,
}

impl CsvBarSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Raw rows exactly as the file holds them, for callers that run
    /// their own normalization pass.
    pub fn load_rows(&self) -> Result<Vec<RawBarRow>, DataSourceError> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| {
            DataSourceError::NotFound {
                what: format!("{}: {e}", self.path.display()),
            }
        })?;
        let mut rows = Vec::new();
        for (i, record) in reader.deserialize::<RawBarRow>().enumerate() {
            let row = record.map_err(|e| DataSourceError::Malformed {
                detail: format!("row {}: {e}", i + 2),
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn parse_all(&self) -> Result<Vec<Bar>, DataSourceError> {
        self.load_rows()?
            .iter()
            .map(|row| {
                parse_bar_row(row).map_err(|e| DataSourceError::Malformed {
                    detail: e.to_string(),
                })
            })
            .collect()
    }
}

impl BarDataSource for CsvBarSource {
    fn get_historical_bars(
        &mut self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, DataSourceError> {
        let mut bars: Vec<Bar> = self
            .parse_all()?
            .into_iter()
            .filter(|b| {
                b.symbol == symbol && b.timeframe == timeframe && b.ts >= start && b.ts <= end
            })
            .collect();
        bars.sort_by(|a, b| a.ts.cmp(&b.ts));
        Ok(bars)
    }

    fn stream_live_bars(
        self: Box<Self>,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<BarStream, DataSourceError> {
        let wanted: Vec<String> = symbols.to_vec();
        let bars = self.parse_all()?;
        Ok(Box::new(bars.into_iter().filter_map(move |b| {
            (wanted.iter().any(|s| *s == b.symbol) && b.timeframe == timeframe).then_some(Ok(b))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const HEADER: &str = "timestamp,symbol,open,high,low,close,volume,timeframe,is_closed\n";

    fn write_csv(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(HEADER.as_bytes()).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn historical_fetch_filters_and_sorts() {
        let f = write_csv(&[
            "2026-01-01T00:02:00Z,BTC-USD,101,101,101,101,5,1m,true",
            "2026-01-01T00:01:00Z,BTC-USD,100,100,100,100,5,1m,true",
            "2026-01-01T00:01:00Z,ETH-USD,10,10,10,10,1,1m,true",
        ]);
        let mut src = CsvBarSource::new(f.path());
        let bars = src
            .get_historical_bars(
                "BTC-USD",
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap(),
                Timeframe::M1,
            )
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].ts < bars[1].ts);
        assert!(bars.iter().all(|b| b.symbol == "BTC-USD"));
    }

    #[test]
    fn fetch_is_restartable() {
        let f = write_csv(&["2026-01-01T00:01:00Z,BTC-USD,100,100,100,100,5,1m,true"]);
        let mut src = CsvBarSource::new(f.path());
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let a = src
            .get_historical_bars("BTC-USD", start, end, Timeframe::M1)
            .unwrap();
        let b = src
            .get_historical_bars("BTC-USD", start, end, Timeframe::M1)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn naive_timestamp_row_is_malformed() {
        let f = write_csv(&["2026-01-01T00:01:00,BTC-USD,100,100,100,100,5,1m,true"]);
        let mut src = CsvBarSource::new(f.path());
        let err = src
            .get_historical_bars(
                "BTC-USD",
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap(),
                Timeframe::M1,
            )
            .unwrap_err();
        assert!(matches!(err, DataSourceError::Malformed { detail } if detail.contains("naive")));
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut src = CsvBarSource::new("/nonexistent/bars.csv");
        let err = src
            .get_historical_bars(
                "BTC-USD",
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap(),
                Timeframe::M1,
            )
            .unwrap_err();
        assert!(matches!(err, DataSourceError::NotFound { .. }));
    }

    #[test]
    fn live_stream_yields_selected_symbols_in_file_order() {
        let f = write_csv(&[
            "2026-01-01T00:01:00Z,BTC-USD,100,100,100,100,5,1m,true",
            "2026-01-01T00:01:00Z,ETH-USD,10,10,10,10,1,1m,true",
            "2026-01-01T00:02:00Z,BTC-USD,101,101,101,101,5,1m,true",
        ]);
        let src = Box::new(CsvBarSource::new(f.path()));
        let stream = src
            .stream_live_bars(&["BTC-USD".to_string()], Timeframe::M1)
            .unwrap();
        let bars: Vec<Bar> = stream.map(|r| r.unwrap()).collect();
        assert_eq!(bars.len(), 2);
        assert!(bars.iter().all(|b| b.symbol == "BTC-USD"));
    }
}
