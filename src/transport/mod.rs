//! BLE GATT transport abstraction.
//!
//! The monitor never talks to a Bluetooth stack directly. It drives an
//! injected [`Transport`], which keeps the acquisition logic testable without
//! hardware and lets the backend be swapped.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::decoder::DecodeError;
use crate::device::DeviceDescriptor;
use crate::reading::Quantity;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sensor data service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12630000_cc25_497d_9854_9b6c02c77054);
/// Temperature characteristic within [`SERVICE_UUID`].
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x12630001_cc25_497d_9854_9b6c02c77054);
/// Humidity characteristic within [`SERVICE_UUID`].
pub const HUMIDITY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x12630003_cc25_497d_9854_9b6c02c77054);

/// Channel buffer size for scan results.
pub const SCAN_CHANNEL_BUFFER_SIZE: usize = 32;

/// Boxed future returned by [`Transport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Devices (or scan failures) as they are discovered.
pub type ScanStream = mpsc::Receiver<Result<DeviceDescriptor, ScanError>>;

/// Error type for device discovery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Error type for establishing a connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Connected, but the sensor's services could not be enumerated
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Error type for service/characteristic enumeration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("Services were not resolved in time")]
    Timeout,
}

/// Error type for a single characteristic read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("Not connected")]
    Disconnected,
    /// The read succeeded but the payload could not be decoded
    #[error("Malformed payload: {0}")]
    Malformed(#[from] DecodeError),
}

/// Whether the transport reports a device more than once per scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplicates {
    #[default]
    Suppress,
    Report,
}

/// Parameters for a scan session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanFilter {
    /// Only report devices advertising one of these services; empty means any.
    pub services: Vec<Uuid>,
    pub duplicates: Duplicates,
}

/// Service and characteristic identifiers of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub temperature: Uuid,
    pub humidity: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            temperature: TEMPERATURE_CHARACTERISTIC_UUID,
            humidity: HUMIDITY_CHARACTERISTIC_UUID,
        }
    }
}

impl GattProfile {
    pub fn characteristic(&self, quantity: Quantity) -> Uuid {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
        }
    }

    pub fn characteristics(&self) -> [Uuid; 2] {
        [self.temperature, self.humidity]
    }
}

/// Capabilities the monitor needs from a BLE stack.
///
/// Every failure is reported as a value; none of them is fatal to the caller.
pub trait Transport: Send + Sync + 'static {
    /// A live link to one peripheral.
    type Connection: Send + Sync + 'static;

    /// Start discovering devices. Results keep coming until [`Transport::stop_scan`]
    /// is called or the receiver is dropped; calling `scan` again restarts discovery.
    fn scan(&self, filter: ScanFilter) -> BoxFuture<'_, Result<ScanStream, ScanError>>;

    fn stop_scan(&self) -> BoxFuture<'_, ()>;

    fn connect<'a>(
        &'a self,
        device: &'a DeviceDescriptor,
    ) -> BoxFuture<'a, Result<Self::Connection, ConnectionError>>;

    /// Enumerate services and make sure every characteristic of `profile` is present.
    fn discover_services<'a>(
        &'a self,
        connection: &'a Self::Connection,
        profile: &'a GattProfile,
    ) -> BoxFuture<'a, Result<(), DiscoveryError>>;

    fn read_characteristic<'a>(
        &'a self,
        connection: &'a Self::Connection,
        service: Uuid,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<Vec<u8>, ReadError>>;

    fn disconnect<'a>(&'a self, connection: &'a Self::Connection) -> BoxFuture<'a, ()>;

    /// Resolves once the transport reports the link as dropped.
    fn link_lost<'a>(&'a self, connection: &'a Self::Connection) -> BoxFuture<'a, ()>;
}
