//! Peripheral identity as seen during scanning.
//!
//! The identifier is a compact 6-byte Bluetooth address, independent of any
//! specific Bluetooth library.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable identifier of a physical peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceId(pub [u8; 6]);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a device address string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseDeviceIdError {
    #[error("invalid device address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid device address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid device address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: [&str; 6] = s
            .trim()
            .split(':')
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|parts: Vec<&str>| ParseDeviceIdError::InvalidLength(parts.len()))?;

        let mut id = DeviceId::default();
        for (i, (octet, byte)) in octets.into_iter().zip(&mut id.0).enumerate() {
            if octet.len() != 2 {
                return Err(ParseDeviceIdError::InvalidPartLength(i));
            }
            *byte = u8::from_str_radix(octet, 16)
                .map_err(|_| ParseDeviceIdError::InvalidHex(octet.to_string()))?;
        }
        Ok(id)
    }
}

impl From<[u8; 6]> for DeviceId {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for DeviceId {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<DeviceId> for bluer::Address {
    fn from(id: DeviceId) -> Self {
        bluer::Address(id.0)
    }
}

/// A named peripheral discovered while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    /// Advertised name; unnamed peripherals never make it into scan results.
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
