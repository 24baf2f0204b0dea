//! InfluxDB line protocol output formatter.

use crate::device::DeviceDescriptor;
use crate::output::OutputFormatter;
use crate::reading::Reading;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, f64>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, spaces and equals signs in measurement names and tags.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape(key), escape(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape(key), value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Pre-epoch times are left for the server to stamp.
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape(&self.measurement))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Every reading becomes one line tagged with the device address and name.
/// The field is named after the quantity; humidity stays in percent.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, device: &DeviceDescriptor) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("device".to_string(), device.id.to_string());
        if !device.name.is_empty() {
            tags.insert("name".to_string(), device.name.clone());
        }
        tags
    }

    fn to_data_point(&self, device: &DeviceDescriptor, reading: &Reading) -> DataPoint {
        let mut field_set = BTreeMap::new();
        field_set.insert(reading.quantity.to_string(), reading.value.to_f64());

        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(device),
            field_set,
            timestamp: Some(reading.captured_at),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, device: &DeviceDescriptor, reading: &Reading) -> String {
        format!("{}", self.to_data_point(device, reading))
    }
}
