//! Display mapping for the latest temperature.
//!
//! Stateless helpers used by a gauge/ring widget: how full the ring is and
//! which color band the temperature falls in.

use crate::fixed_point::FixedPoint;

/// Temperature at an empty ring.
pub const GAUGE_MIN: FixedPoint = FixedPoint::from_whole(0);
/// Temperature at a full ring.
pub const GAUGE_MAX: FixedPoint = FixedPoint::from_whole(40);

/// Fraction of the gauge range covered by `value`, clamped to `0.0..=1.0`.
pub fn intensity(value: FixedPoint) -> f64 {
    let span = f64::from(GAUGE_MAX.hundredths() - GAUGE_MIN.hundredths());
    let offset = f64::from(value.hundredths() - GAUGE_MIN.hundredths());
    (offset / span).clamp(0.0, 1.0)
}

/// Discrete temperature bands, coldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColorBand {
    /// ≤ 8 °C
    DeepBlue,
    /// ≤ 12 °C
    SkyBlue,
    /// ≤ 15 °C
    Teal,
    /// ≤ 20 °C
    LightGreen,
    /// ≤ 27 °C
    Green,
    /// ≤ 28 °C
    Yellow,
    /// ≤ 30 °C
    Orange,
    /// above 30 °C
    Red,
}

/// Inclusive upper bounds of every band but the hottest.
const BREAKPOINTS: [(FixedPoint, ColorBand); 7] = [
    (FixedPoint::from_whole(8), ColorBand::DeepBlue),
    (FixedPoint::from_whole(12), ColorBand::SkyBlue),
    (FixedPoint::from_whole(15), ColorBand::Teal),
    (FixedPoint::from_whole(20), ColorBand::LightGreen),
    (FixedPoint::from_whole(27), ColorBand::Green),
    (FixedPoint::from_whole(28), ColorBand::Yellow),
    (FixedPoint::from_whole(30), ColorBand::Orange),
];

impl ColorBand {
    pub fn for_value(value: FixedPoint) -> Self {
        BREAKPOINTS
            .iter()
            .find(|(upper, _)| value <= *upper)
            .map_or(ColorBand::Red, |(_, band)| *band)
    }

    /// Position of the band, 0 for the coldest.
    pub fn index(self) -> usize {
        self as usize
    }

    /// RGB hex color drawn for the band.
    pub fn color(self) -> &'static str {
        match self {
            ColorBand::DeepBlue => "#0000FF",
            ColorBand::SkyBlue => "#3399FF",
            ColorBand::Teal => "#00CCCC",
            ColorBand::LightGreen => "#66FF66",
            ColorBand::Green => "#00CC00",
            ColorBand::Yellow => "#FFFF00",
            ColorBand::Orange => "#FF8000",
            ColorBand::Red => "#FF0000",
        }
    }
}
