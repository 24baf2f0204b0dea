//! Decoded sensor readings.

use crate::fixed_point::FixedPoint;
use std::fmt;
use std::time::SystemTime;

/// The physical quantity a characteristic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Degrees Celsius
    Temperature,
    /// Percent relative humidity
    Humidity,
}

impl Quantity {
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature => "°C",
            Quantity::Humidity => "%",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Temperature => write!(f, "temperature"),
            Quantity::Humidity => write!(f, "humidity"),
        }
    }
}

/// A single decoded value, immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub quantity: Quantity,
    pub value: FixedPoint,
    /// Wall-clock time the read completed
    pub captured_at: SystemTime,
}

impl Reading {
    pub fn new(quantity: Quantity, value: FixedPoint, captured_at: SystemTime) -> Self {
        Self {
            quantity,
            value,
            captured_at,
        }
    }

    pub fn temperature(value: FixedPoint, captured_at: SystemTime) -> Self {
        Self::new(Quantity::Temperature, value, captured_at)
    }

    pub fn humidity(value: FixedPoint, captured_at: SystemTime) -> Self {
        Self::new(Quantity::Humidity, value, captured_at)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.quantity, self.value, self.quantity.unit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_display() {
        let t = Reading::temperature(FixedPoint::from_hundredths(2430), SystemTime::UNIX_EPOCH);
        assert_eq!(t.to_string(), "temperature 24.30°C");

        let h = Reading::humidity(FixedPoint::from_hundredths(5349), SystemTime::UNIX_EPOCH);
        assert_eq!(h.to_string(), "humidity 53.49%");
    }
}
