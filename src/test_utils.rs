use crate::acquisition::{MonitorEvent, State};
use crate::device::{DeviceDescriptor, DeviceId};
use crate::fixed_point::FixedPoint;
use crate::reading::Reading;
use crate::transport::{
    BoxFuture, ConnectionError, DiscoveryError, GattProfile, ReadError, SCAN_CHANNEL_BUFFER_SIZE,
    ScanError, ScanFilter, ScanStream, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, mpsc};
use uuid::Uuid;

/// A stable device address for unit tests.
pub const TEST_DEVICE: DeviceId = DeviceId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Value returned by [`FakeTransport`] once a scripted read queue is empty.
pub const FALLBACK_HUNDREDTHS: u16 = 2000;

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

pub fn device(id: DeviceId, name: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(id, name)
}

pub fn temperature(hundredths: i32, secs: u64) -> Reading {
    Reading::temperature(FixedPoint::from_hundredths(hundredths), at(secs))
}

/// Characteristic payload carrying `hundredths` in bytes 1..=2.
pub fn payload(hundredths: u16) -> Vec<u8> {
    let [lo, hi] = hundredths.to_le_bytes();
    vec![0x00, lo, hi]
}

/// Transport operations recorded by [`FakeTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Scan,
    StopScan,
    Connect(DeviceId),
    Discover,
    Read(Uuid),
    Disconnect,
}

#[derive(Debug)]
pub struct FakeConnection {
    pub device: DeviceId,
}

/// Scripted in-memory transport.
///
/// Scans report the configured devices and stay open until stopped. Reads pop
/// from a per-characteristic queue and fall back to [`FALLBACK_HUNDREDTHS`].
#[derive(Debug, Default)]
pub struct FakeTransport {
    devices: Vec<DeviceDescriptor>,
    reads: Mutex<HashMap<Uuid, VecDeque<Result<Vec<u8>, ReadError>>>>,
    connect_error: Option<ConnectionError>,
    discovery_error: Option<DiscoveryError>,
    scan_delay: Duration,
    connect_delay: Duration,
    read_delay: Duration,
    scan_tx: Mutex<Option<mpsc::Sender<Result<DeviceDescriptor, ScanError>>>>,
    link: Notify,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(mut self, devices: Vec<DeviceDescriptor>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_reads(self, characteristic: Uuid, reads: Vec<Result<Vec<u8>, ReadError>>) -> Self {
        self.reads
            .lock()
            .unwrap()
            .insert(characteristic, reads.into());
        self
    }

    /// Report the scripted devices only after `delay`.
    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_connect(mut self, error: ConnectionError) -> Self {
        self.connect_error = Some(error);
        self
    }

    pub fn failing_discovery(mut self, error: DiscoveryError) -> Self {
        self.discovery_error = Some(error);
        self
    }

    /// Make the pending (or next) `link_lost` future resolve.
    pub fn lose_link(&self) {
        self.link.notify_one();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Read(_)))
            .count()
    }

    /// Highest number of reads observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for FakeTransport {
    type Connection = FakeConnection;

    fn scan(&self, _filter: ScanFilter) -> BoxFuture<'_, Result<ScanStream, ScanError>> {
        Box::pin(async move {
            self.record(Call::Scan);
            let (tx, rx) = mpsc::channel(SCAN_CHANNEL_BUFFER_SIZE);
            if self.scan_delay.is_zero() {
                for device in &self.devices {
                    tx.try_send(Ok(device.clone())).unwrap();
                }
            } else {
                let (delay, devices, tx) = (self.scan_delay, self.devices.clone(), tx.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for device in devices {
                        let _ = tx.send(Ok(device)).await;
                    }
                });
            }
            *self.scan_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        })
    }

    fn stop_scan(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(Call::StopScan);
            self.scan_tx.lock().unwrap().take();
        })
    }

    fn connect<'a>(
        &'a self,
        device: &'a DeviceDescriptor,
    ) -> BoxFuture<'a, Result<FakeConnection, ConnectionError>> {
        Box::pin(async move {
            self.record(Call::Connect(device.id));
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            match &self.connect_error {
                Some(error) => Err(error.clone()),
                None => Ok(FakeConnection { device: device.id }),
            }
        })
    }

    fn discover_services<'a>(
        &'a self,
        _connection: &'a FakeConnection,
        _profile: &'a GattProfile,
    ) -> BoxFuture<'a, Result<(), DiscoveryError>> {
        Box::pin(async move {
            self.record(Call::Discover);
            match &self.discovery_error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        })
    }

    fn read_characteristic<'a>(
        &'a self,
        _connection: &'a FakeConnection,
        _service: Uuid,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<Vec<u8>, ReadError>> {
        Box::pin(async move {
            self.record(Call::Read(characteristic));
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            if !self.read_delay.is_zero() {
                tokio::time::sleep(self.read_delay).await;
            }

            self.reads
                .lock()
                .unwrap()
                .get_mut(&characteristic)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(payload(FALLBACK_HUNDREDTHS)))
        })
    }

    fn disconnect<'a>(&'a self, _connection: &'a FakeConnection) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.record(Call::Disconnect) })
    }

    fn link_lost<'a>(&'a self, _connection: &'a FakeConnection) -> BoxFuture<'a, ()> {
        Box::pin(self.link.notified())
    }
}

/// Receive events until one matches `predicate`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<MonitorEvent>,
    predicate: impl Fn(&MonitorEvent) -> bool,
) -> MonitorEvent {
    let matching = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("monitor stopped"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), matching)
        .await
        .expect("timed out waiting for event")
}

pub async fn wait_for_state(events: &mut broadcast::Receiver<MonitorEvent>, state: State) {
    wait_for(events, |e| *e == MonitorEvent::StateChanged(state)).await;
}
