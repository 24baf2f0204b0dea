//! One-shot temperature threshold alerting.
//!
//! The alerter fires once when a temperature strictly exceeds the limit and
//! then disarms itself. The operator has to set a new limit before it can fire
//! again, so a sustained over-limit condition produces a single alert.

use crate::fixed_point::{FixedPoint, ParseFixedPointError};
use crate::reading::{Quantity, Reading};
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Raised when a temperature crosses the armed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub limit: FixedPoint,
    pub value: FixedPoint,
    pub captured_at: SystemTime,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temperature {}°C is over the limit of {}°C",
            self.value, self.limit
        )
    }
}

/// Errors returned for operator supplied limits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    #[error("limit contains no digits")]
    Empty,
    #[error("invalid limit: {0}")]
    Invalid(#[from] ParseFixedPointError),
}

/// Parse free-form limit text such as `"30°C"` or `" 30 "`.
///
/// Every character that is not an ASCII digit is dropped before parsing, so
/// the limit is a non-negative whole number of degrees. A decimal point is
/// dropped as well: `"27.5"` becomes 275.
pub fn parse_limit(text: &str) -> Result<FixedPoint, LimitError> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(LimitError::Empty);
    }
    Ok(digits.parse()?)
}

/// Threshold state owned by the alerter.
#[derive(Debug, Default, Clone)]
pub struct ThresholdAlerter {
    limit: Option<FixedPoint>,
    armed: bool,
}

impl ThresholdAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm with a new limit, replacing any previous one.
    pub fn set_limit(&mut self, limit: FixedPoint) {
        self.limit = Some(limit);
        self.armed = true;
    }

    /// Disarm without firing.
    pub fn clear(&mut self) {
        self.limit = None;
        self.armed = false;
    }

    pub fn limit(&self) -> Option<FixedPoint> {
        self.limit
    }

    pub fn is_armed(&self) -> bool {
        self.armed && self.limit.is_some()
    }

    /// Check a reading against the limit. Humidity readings are ignored.
    ///
    /// Returns the alert when `reading.value > limit`, consuming the limit.
    pub fn observe(&mut self, reading: &Reading) -> Option<Alert> {
        if reading.quantity != Quantity::Temperature || !self.armed {
            return None;
        }
        let limit = self.limit?;
        if reading.value <= limit {
            return None;
        }

        self.clear();
        Some(Alert {
            limit,
            value: reading.value,
            captured_at: reading.captured_at,
        })
    }
}
