//! Canonical timeframe.
//!
//! Execution is locked to one-minute bars.  The enum is `#[non_exhaustive]`
//! so a coarser timeframe can be added later without breaking downstream
//! matches that already carry a wildcard arm.

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Bar timeframe.  Serializes as the canonical string (`"1m"`).
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timeframe {
    /// One-minute bars — the only timeframe the engines accept.
    #[default]
    M1,
}

impl Timeframe {
    /// Bar-to-bar step in seconds.
    pub const fn secs(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
        }
    }

    /// Canonical string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
        }
    }

    /// Parse the canonical string form.  Anything but `"1m"` is rejected.
    pub fn parse(s: &str) -> Result<Timeframe, UnsupportedTimeframe> {
        match s.trim() {
            "1m" => Ok(Timeframe::M1),
            other => Err(UnsupportedTimeframe {
                raw: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timeframe::parse(&s).map_err(D::Error::custom)
    }
}

/// The timeframe string is not one the runtime supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedTimeframe {
    pub raw: String,
}

impl fmt::Display for UnsupportedTimeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported timeframe '{}' (expected '1m')", self.raw)
    }
}

impl std::error::Error for UnsupportedTimeframe {}
