//! Fixed-point money type.
//!
//! # Motivation
//!
//! All prices, cash amounts, and notionals in this system use a 1e-6
//! (micros) fixed-point representation stored as `i64`.  Raw `i64` for
//! money is error-prone: it allows accidental arithmetic with unrelated
//! integers (share quantities, sequence numbers, basis points) without
//! any compile-time signal.
//!
//! `Micros` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Micros` with unrelated `i64` values in arithmetic.
//!
//! # Scale
//!
//! 1 currency unit = 1_000_000 micros.  Non-monetary quantities (share
//! counts, basis points, sequence numbers) remain plain `i64` and are
//! never implicitly convertible.
//!
//! # Serialization
//!
//! `Micros` serializes as a canonical decimal string with exactly six
//! fractional digits (`"101.000000"`).  This keeps artifact hashing
//! independent of any binary integer encoding and preserves the decimal
//! nature of the source data.  Floating point is never used at any stage.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Basis points per unit ratio (1.0 == 10_000 bps).
pub const BPS_SCALE: i64 = 10_000;

/// Micros per currency unit.
pub const MICROS_SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Micros newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-6 scale (micros).
///
/// Use [`Micros::new`] for explicit construction from a raw micro count,
/// [`Micros::from_units`] for whole currency units, or
/// [`Micros::parse_decimal`] for decimal strings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Micros(i64);

impl Micros {
    /// Zero monetary amount.
    pub const ZERO: Micros = Micros(0);

    /// Maximum representable value.
    pub const MAX: Micros = Micros(i64::MAX);

    /// Construct from a raw micro count.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Construct from whole currency units (`Micros::from_units(101)` == 101.000000).
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Micros(units * MICROS_SCALE)
    }

    /// Extract the underlying raw `i64` micro count.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Saturating addition.
    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    pub fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    /// Absolute value.  `Micros(i64::MIN).abs()` saturates to `Micros::MAX`.
    #[inline]
    pub fn abs(self) -> Micros {
        Micros(self.0.saturating_abs())
    }

    /// `true` if this amount is strictly negative.
    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `true` if this amount is exactly zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiply a per-unit price by an integer share quantity.
    ///
    /// Returns `None` on `i64` overflow.  Callers MUST handle `None`
    /// explicitly; overflow in a trade-value calculation is a critical
    /// error, not a routine saturation.
    #[inline]
    pub fn checked_mul_qty(self, qty: i64) -> Option<Micros> {
        self.0.checked_mul(qty).map(Micros)
    }

    /// Multiply by a basis-point ratio, truncating toward zero.
    ///
    /// `Micros::from_units(100).mul_bps(10)` == 0.100000 (10 bps of 100).
    /// Intermediate math is `i128`, so the product cannot overflow for any
    /// representable operands.
    #[inline]
    pub fn mul_bps(self, bps: i64) -> Micros {
        let v = (self.0 as i128 * bps as i128) / BPS_SCALE as i128;
        Micros(clamp_i128(v))
    }

    /// This amount as a basis-point ratio of `denom`, truncating toward zero.
    ///
    /// Returns 0 when `denom` is zero (a ratio against nothing is reported
    /// as no exposure rather than a panic).
    #[inline]
    pub fn ratio_bps(self, denom: Micros) -> i64 {
        if denom.0 == 0 {
            return 0;
        }
        clamp_i128((self.0 as i128 * BPS_SCALE as i128) / denom.0 as i128)
    }

    /// Integer quantity such that `qty × price ≤ self`, truncating toward zero.
    ///
    /// Returns 0 when `price` is non-positive.
    #[inline]
    pub fn div_price(self, price: Micros) -> i64 {
        if price.0 <= 0 {
            return 0;
        }
        self.0 / price.0
    }

    /// Parse a decimal string into micros deterministically.
    ///
    /// Rules:
    /// - Optional leading `+` or `-`.
    /// - Optional fractional part separated by `.`.
    /// - More than 6 decimal places is rejected (would require rounding).
    /// - Empty strings, non-digit characters, or multiple `.` separators
    ///   are rejected.
    /// - No floating point at any stage.
    pub fn parse_decimal(s: &str) -> Result<Micros, ParseMicrosError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseMicrosError::Empty);
        }

        let (negative, digits) = if let Some(rest) = s.strip_prefix('-') {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix('+') {
            (false, rest)
        } else {
            (false, s)
        };

        let invalid = || ParseMicrosError::Invalid { raw: s.to_string() };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(invalid());
        }
        if frac_part.len() > 6 {
            return Err(ParseMicrosError::TooManyDecimals { raw: s.to_string() });
        }

        let int_val: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse::<i64>().map_err(|_| invalid())?
        };

        let mut frac_padded = frac_part.to_string();
        while frac_padded.len() < 6 {
            frac_padded.push('0');
        }
        let frac_val: i64 = frac_padded.parse::<i64>().map_err(|_| invalid())?;

        let micros = int_val
            .checked_mul(MICROS_SCALE)
            .and_then(|v| v.checked_add(frac_val))
            .ok_or_else(invalid)?;

        Ok(Micros(if negative { -micros } else { micros }))
    }
}

#[inline]
fn clamp_i128(v: i128) -> i64 {
    if v > i64::MAX as i128 {
        i64::MAX
    } else if v < i64::MIN as i128 {
        i64::MIN
    } else {
        v as i64
    }
}

// ---------------------------------------------------------------------------
// Parse error
// ---------------------------------------------------------------------------

/// Errors produced by [`Micros::parse_decimal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMicrosError {
    /// The input was empty or whitespace-only.
    Empty,
    /// The input was not a decimal number.
    Invalid { raw: String },
    /// The input had more than 6 decimal places (ambiguous micro conversion).
    TooManyDecimals { raw: String },
}

impl fmt::Display for ParseMicrosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseMicrosError::Empty => write!(f, "decimal amount is empty"),
            ParseMicrosError::Invalid { raw } => {
                write!(f, "decimal amount could not be parsed: '{raw}'")
            }
            ParseMicrosError::TooManyDecimals { raw } => {
                write!(
                    f,
                    "decimal amount has more than 6 decimal places: '{raw}'"
                )
            }
        }
    }
}

impl std::error::Error for ParseMicrosError {}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Micros)
// ---------------------------------------------------------------------------

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Micros {
    fn sum<I: Iterator<Item = Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, Add::add)
    }
}

// ---------------------------------------------------------------------------
// Display + serde (canonical decimal string)
// ---------------------------------------------------------------------------

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / MICROS_SCALE;
        let frac = (self.0 % MICROS_SCALE).abs();
        // When |value| < 1 unit and negative, `units` truncates to 0 and
        // loses the sign.  Emit "-0" explicitly in that case.
        if self.0 < 0 && units == 0 {
            write!(f, "-{units}.{frac:06}")
        } else {
            write!(f, "{units}.{frac:06}")
        }
    }
}

impl Serialize for Micros {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Micros {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Micros::parse_decimal(&s).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
