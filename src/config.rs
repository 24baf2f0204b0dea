//! Monitor settings and the parsers used for their command-line forms.

use crate::transport::{Duplicates, GattProfile, ScanFilter};
use std::time::Duration;
use time::UtcOffset;
use time::macros::format_description;

/// How long a scan runs before returning to idle.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
/// Period between two polling cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Visible chart labels requested when none is given.
pub const DEFAULT_MAX_LABELS: usize = 12;

/// Timing and protocol settings of a [`crate::monitor::Monitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub scan_timeout: Duration,
    pub poll_interval: Duration,
    pub profile: GattProfile,
    pub scan_filter: ScanFilter,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            profile: GattProfile::default(),
            scan_filter: ScanFilter {
                services: Vec::new(),
                duplicates: Duplicates::Suppress,
            },
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use thermo_monitor::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Without suffix, value is interpreted as seconds
    let (num, millis_per_unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1_000)
    } else {
        (src, 1_000)
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too large: {}", src))
}

/// Like [`parse_duration`], but zero is rejected.
pub fn parse_period(src: &str) -> Result<Duration, String> {
    match parse_duration(src)? {
        Duration::ZERO => Err("duration must be greater than zero".to_string()),
        period => Ok(period),
    }
}

/// Parse a UTC offset such as `+02:00`, `-05:30`, `Z` or `UTC`.
pub fn parse_utc_offset(src: &str) -> Result<UtcOffset, String> {
    let src = src.trim();
    if src.eq_ignore_ascii_case("z") || src.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(
        src,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|e| format!("invalid UTC offset '{}': {}", src, e))
}
