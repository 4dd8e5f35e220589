//! qx-marketdata
//!
//! Bar ingestion: canonical normalization (batch and streaming), the
//! execution readiness gate, and the CSV-backed historical source.
//!
//! Contract: whatever the upstream source looks like, what comes out of
//! this crate is a `(symbol, ts)`-sorted sequence of closed, schema-valid,
//! deduplicated one-minute bars with gaps annotated — never fabricated.

mod csv_source;
mod normalizer;
mod readiness;
mod stream;

pub use csv_source::CsvBarSource;
pub use normalizer::{
    normalize_batch, parse_bar_row, parse_utc_timestamp, DedupWinner, GapEvent, GapPolicy,
    NormalizeOutput, NormalizeReport, NormalizerConfig, NormalizerError, RawBarRow,
};
pub use readiness::{Admission, ReadinessError, ReadinessGate};
pub use stream::StreamNormalizer;
