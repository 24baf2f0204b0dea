//! `thermo-monitor` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The acquisition logic lives in [`crate::acquisition`] and
//! [`crate::monitor`], driven through the [`crate::transport::Transport`] trait
//! so it can be tested deterministically without Bluetooth hardware.

pub mod acquisition;
pub mod alert;
pub mod app;
pub mod config;
pub mod decoder;
pub mod device;
pub mod fixed_point;
pub mod gauge;
pub mod history;
pub mod monitor;
pub mod output;
pub mod reading;
pub mod transport;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use acquisition::{Acquisition, ConnectionState, MonitorEvent, Snapshot, State};
pub use alert::{Alert, ThresholdAlerter, parse_limit};
pub use config::{MonitorConfig, parse_duration};
pub use decoder::{DecodeError, decode};
pub use device::{DeviceDescriptor, DeviceId};
pub use fixed_point::FixedPoint;
pub use history::{HistoryStore, Series};
pub use monitor::{Command, Monitor, MonitorHandle};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use reading::{Quantity, Reading};
pub use transport::{ConnectionError, DiscoveryError, ReadError, ScanError, Transport};
