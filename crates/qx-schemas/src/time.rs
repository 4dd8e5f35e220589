//! Canonical timestamp handling.
//!
//! Artifacts serialize timestamps as RFC-3339 UTC truncated to microsecond
//! precision.  Truncation happens at ingest so every downstream value is
//! already canonical and serde round-trips are lossless.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Truncate a UTC instant to microsecond precision.
pub fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    match Utc.timestamp_micros(ts.timestamp_micros()) {
        chrono::LocalResult::Single(t) => t,
        // timestamp_micros is total for any in-range instant; fall back to
        // the input if the instant is outside the representable range.
        _ => ts,
    }
}

/// Canonical RFC-3339 form: UTC, microsecond precision, `Z` suffix.
pub fn to_canonical_rfc3339(ts: DateTime<Utc>) -> String {
    truncate_micros(ts).to_rfc3339_opts(SecondsFormat::Micros, true)
}
