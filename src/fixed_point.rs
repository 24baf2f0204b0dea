//! Signed decimal quantity with two fractional digits.
//!
//! Sensor values arrive as integers scaled by 100, so they are kept as whole
//! hundredths instead of floats. Comparisons used for alerting and color
//! banding are therefore exact.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A physical quantity with 0.01 unit resolution, stored as hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(i32);

impl FixedPoint {
    pub const ZERO: FixedPoint = FixedPoint(0);

    /// Construct from a raw count of hundredths (`4660` is `46.60`).
    pub const fn from_hundredths(hundredths: i32) -> Self {
        Self(hundredths)
    }

    /// Construct from a whole number of units.
    pub const fn from_whole(units: i32) -> Self {
        Self(units * 100)
    }

    pub const fn hundredths(self) -> i32 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Errors returned when parsing a decimal string into a [`FixedPoint`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFixedPointError {
    #[error("empty number")]
    Empty,
    #[error("invalid number: '{0}'")]
    Invalid(String),
    #[error("number out of range: '{0}'")]
    OutOfRange(String),
}

impl FromStr for FixedPoint {
    type Err = ParseFixedPointError;

    /// Parse `[-]digits[.digits]`. Fraction digits past the second are truncated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseFixedPointError::Empty);
        }

        let (negative, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
            return Err(ParseFixedPointError::Invalid(s.to_string()));
        }

        let out_of_range = || ParseFixedPointError::OutOfRange(s.to_string());
        let whole: i32 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| out_of_range())?
        };

        let mut cents = 0;
        for (i, digit) in fraction.bytes().take(2).enumerate() {
            let weight = if i == 0 { 10 } else { 1 };
            cents += i32::from(digit - b'0') * weight;
        }

        let hundredths = whole
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .ok_or_else(out_of_range)?;

        Ok(FixedPoint(if negative { -hundredths } else { hundredths }))
    }
}
