//! Output formatters for sensor readings.
//!
//! This module provides a trait for formatting readings and an InfluxDB line
//! protocol implementation, so the monitor can feed Telegraf's `execd` input.

pub mod influxdb;

use crate::device::DeviceDescriptor;
use crate::reading::Reading;

/// Trait for formatting readings into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format one reading taken from `device`.
    fn format(&self, device: &DeviceDescriptor, reading: &Reading) -> String;
}
