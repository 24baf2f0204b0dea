//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to talk to the BlueZ daemon via D-Bus.
//! It requires the `bluetoothd` daemon to be running.

use super::{
    BoxFuture, ConnectionError, DiscoveryError, Duplicates, GattProfile, ReadError,
    SCAN_CHANNEL_BUFFER_SIZE, ScanError, ScanFilter, ScanStream, Transport,
};
use crate::device::DeviceDescriptor;
use bluer::gatt::remote::Characteristic;
use bluer::{
    Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long BlueZ gets to resolve services after connecting.
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

impl From<bluer::Error> for ConnectionError {
    fn from(err: bluer::Error) -> Self {
        ConnectionError::Bluetooth(err.to_string())
    }
}

impl From<bluer::Error> for DiscoveryError {
    fn from(err: bluer::Error) -> Self {
        DiscoveryError::Bluetooth(err.to_string())
    }
}

impl From<bluer::Error> for ReadError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            bluer::ErrorKind::NotConnected => ReadError::Disconnected,
            _ => ReadError::Bluetooth(err.to_string()),
        }
    }
}

/// A connected BlueZ device with its resolved sensor characteristics.
pub struct BluerConnection {
    device: Device,
    characteristics: Mutex<HashMap<(Uuid, Uuid), Characteristic>>,
}

impl BluerConnection {
    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<Characteristic> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(service, characteristic))
            .cloned()
    }
}

/// Transport backed by the default BlueZ adapter.
pub struct BluerTransport {
    // Keeps the D-Bus connection alive for the adapter.
    _session: Session,
    adapter: Adapter,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BluerTransport {
    /// Open a session to the default adapter and power it on.
    pub async fn new() -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        debug!("using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            scan_task: Mutex::new(None),
        })
    }

    fn take_scan_task(&self) -> Option<JoinHandle<()>> {
        self.scan_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_scan_task(&self, task: JoinHandle<()>) {
        *self.scan_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

impl Drop for BluerTransport {
    fn drop(&mut self) {
        if let Some(task) = self.take_scan_task() {
            task.abort();
        }
    }
}

/// Describe a discovered device, skipping devices without a name.
async fn describe(adapter: &Adapter, address: Address) -> Result<Option<DeviceDescriptor>, ScanError> {
    let device = adapter.device(address)?;
    Ok(device
        .name()
        .await?
        .map(|name| DeviceDescriptor::new(address.into(), name)))
}

/// Keep scanning past devices that could not be described.
///
/// BlueZ may drop a temporary device between `DeviceAdded` and the name query.
fn discovered(
    address: Address,
    described: Result<Option<DeviceDescriptor>, ScanError>,
) -> Option<DeviceDescriptor> {
    described.unwrap_or_else(|e| {
        warn!("skipping {}: {}", address, e);
        None
    })
}

async fn wait_services_resolved(device: &Device) -> Result<(), DiscoveryError> {
    let resolved = async {
        while !device.is_services_resolved().await? {
            tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
        }
        Ok::<_, DiscoveryError>(())
    };
    tokio::time::timeout(SERVICES_RESOLVE_TIMEOUT, resolved)
        .await
        .map_err(|_| DiscoveryError::Timeout)?
}

impl Transport for BluerTransport {
    type Connection = BluerConnection;

    fn scan(&self, filter: ScanFilter) -> BoxFuture<'_, Result<ScanStream, ScanError>> {
        Box::pin(async move {
            if let Some(previous) = self.take_scan_task() {
                previous.abort();
            }

            self.adapter
                .set_discovery_filter(DiscoveryFilter {
                    uuids: filter.services.iter().copied().collect(),
                    transport: DiscoveryTransport::Le,
                    duplicate_data: filter.duplicates == Duplicates::Report,
                    ..Default::default()
                })
                .await?;
            let events = self.adapter.discover_devices().await?;

            let (tx, rx) = mpsc::channel(SCAN_CHANNEL_BUFFER_SIZE);
            let adapter = self.adapter.clone();

            // Discovery stays active for as long as the event stream is alive.
            let task = tokio::spawn(async move {
                let mut events = Box::pin(events);
                while let Some(event) = events.next().await {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        continue;
                    };
                    let Some(device) = discovered(address, describe(&adapter, address).await)
                    else {
                        continue;
                    };
                    if tx.send(Ok(device)).await.is_err() {
                        break;
                    }
                }
            });
            self.set_scan_task(task);

            Ok(rx)
        })
    }

    fn stop_scan(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(task) = self.take_scan_task() {
                task.abort();
            }
        })
    }

    fn connect<'a>(
        &'a self,
        device: &'a DeviceDescriptor,
    ) -> BoxFuture<'a, Result<BluerConnection, ConnectionError>> {
        Box::pin(async move {
            let handle = self.adapter.device(device.id.into())?;
            if !handle.is_connected().await? {
                handle.connect().await?;
            }
            Ok(BluerConnection {
                device: handle,
                characteristics: Mutex::new(HashMap::new()),
            })
        })
    }

    fn discover_services<'a>(
        &'a self,
        connection: &'a BluerConnection,
        profile: &'a GattProfile,
    ) -> BoxFuture<'a, Result<(), DiscoveryError>> {
        Box::pin(async move {
            wait_services_resolved(&connection.device).await?;

            let mut service_found = false;
            let mut found = HashMap::new();
            for service in connection.device.services().await? {
                if service.uuid().await? != profile.service {
                    continue;
                }
                service_found = true;
                for characteristic in service.characteristics().await? {
                    let uuid = characteristic.uuid().await?;
                    if profile.characteristics().contains(&uuid) {
                        found.insert((profile.service, uuid), characteristic);
                    }
                }
            }

            if !service_found {
                return Err(DiscoveryError::ServiceNotFound(profile.service));
            }
            if let Some(missing) = profile
                .characteristics()
                .into_iter()
                .find(|uuid| !found.contains_key(&(profile.service, *uuid)))
            {
                return Err(DiscoveryError::CharacteristicNotFound(missing));
            }

            *connection
                .characteristics
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = found;
            Ok(())
        })
    }

    fn read_characteristic<'a>(
        &'a self,
        connection: &'a BluerConnection,
        service: Uuid,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<Vec<u8>, ReadError>> {
        Box::pin(async move {
            let handle = connection
                .characteristic(service, characteristic)
                .ok_or(ReadError::CharacteristicNotFound(characteristic))?;
            Ok(handle.read().await?)
        })
    }

    fn disconnect<'a>(&'a self, connection: &'a BluerConnection) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = connection.device.disconnect().await {
                warn!("failed to disconnect {}: {}", connection.device.address(), e);
            }
        })
    }

    fn link_lost<'a>(&'a self, connection: &'a BluerConnection) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let events = match connection.device.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("cannot watch connection state: {}", e);
                    return futures::future::pending().await;
                }
            };
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    return;
                }
            }
        })
    }
}
