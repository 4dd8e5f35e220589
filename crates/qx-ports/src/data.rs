//! Market-data port.

use std::fmt;

use chrono::{DateTime, Utc};

use qx_schemas::{Bar, Timeframe};

/// Errors a data source implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// The requested symbol/range/file does not exist.
    NotFound { what: String },
    /// Transport or file IO failure.
    Io { detail: String },
    /// A row could not be decoded into a bar.
    Malformed { detail: String },
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NotFound { what } => write!(f, "data source: '{what}' not found"),
            DataSourceError::Io { detail } => write!(f, "data source io error: {detail}"),
            DataSourceError::Malformed { detail } => {
                write!(f, "data source malformed row: {detail}")
            }
        }
    }
}

impl std::error::Error for DataSourceError {}

/// A lazy, possibly infinite sequence of bars.
pub type BarStream = Box<dyn Iterator<Item = Result<Bar, DataSourceError>>>;

/// Source of OHLCV bars.
///
/// Historical fetches are finite and restartable; the live stream consumes
/// the source (it is not restartable), which the signature enforces by
/// taking `self` by box.
pub trait BarDataSource {
    fn get_historical_bars(
        &mut self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, DataSourceError>;

    fn stream_live_bars(
        self: Box<Self>,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<BarStream, DataSourceError>;
}
