//! Acquisition state machine.
//!
//! [`Acquisition`] holds every piece of monitor state and implements the
//! transitions as plain synchronous methods. It performs no I/O: the async
//! driver in [`crate::monitor`] calls the transport and feeds the outcomes in
//! here. Anything the presentation layer should hear about is queued as a
//! [`MonitorEvent`] and collected with [`Acquisition::drain_events`].
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Polling -> Disconnected
//!  ^         |            |                        |
//!  +---------+ (timeout)  +-> Disconnected (fail)  +-> Idle (new scan)
//! ```

use crate::alert::{Alert, LimitError, ThresholdAlerter, parse_limit};
use crate::device::{DeviceDescriptor, DeviceId};
use crate::fixed_point::FixedPoint;
use crate::history::{HistoryStore, Series};
use crate::reading::{Quantity, Reading};
use crate::transport::{ConnectionError, ReadError, ScanError};
use log::{debug, info, warn};
use std::fmt;
use thiserror::Error;

/// Phase of the acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No device selected
    Idle,
    /// Device discovery active
    Scanning,
    Connecting,
    /// Connected and polling characteristics
    Polling,
    /// Session over; a new scan starts from `Idle`
    Disconnected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Scanning => "scanning",
            State::Connecting => "connecting",
            State::Polling => "polling",
            State::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Status of the link to the selected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed
    Failed,
}

/// Operator action not allowed in the current state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: State },
    #[error("device {0} is not in the scan results")]
    UnknownDevice(DeviceId),
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    StateChanged(State),
    DeviceFound(DeviceDescriptor),
    Reading(Reading),
    /// A read failed; the previous value for `quantity` is kept
    ReadFailed { quantity: Quantity, error: ReadError },
    Alert(Alert),
    ScanFailed(ScanError),
    ConnectionFailed(ConnectionError),
    LimitSet(FixedPoint),
    LimitRejected(LimitError),
    Rejected(TransitionError),
}

/// Point-in-time copy of the monitor state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: State,
    pub connection: ConnectionState,
    pub devices: Vec<DeviceDescriptor>,
    pub device: Option<DeviceDescriptor>,
    pub temperature: Option<Reading>,
    pub humidity: Option<Reading>,
    pub limit: Option<FixedPoint>,
    pub history_len: usize,
}

/// The acquisition state and its transitions.
#[derive(Debug)]
pub struct Acquisition {
    state: State,
    devices: Vec<DeviceDescriptor>,
    device: Option<DeviceDescriptor>,
    connection_failed: bool,
    /// Incremented for every connection attempt; outcomes tagged with an
    /// older session are stale.
    session: u64,
    temperature: Option<Reading>,
    humidity: Option<Reading>,
    history: HistoryStore,
    alerter: ThresholdAlerter,
    outbox: Vec<MonitorEvent>,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::new(HistoryStore::new())
    }
}

impl Acquisition {
    pub fn new(history: HistoryStore) -> Self {
        Self {
            state: State::Idle,
            devices: Vec::new(),
            device: None,
            connection_failed: false,
            session: 0,
            temperature: None,
            humidity: None,
            history,
            alerter: ThresholdAlerter::new(),
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.state {
            State::Connecting => ConnectionState::Connecting,
            State::Polling => ConnectionState::Connected,
            State::Disconnected if self.connection_failed => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Current scan results.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// The selected device, kept after disconnecting.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    pub fn temperature(&self) -> Option<&Reading> {
        self.temperature.as_ref()
    }

    pub fn humidity(&self) -> Option<&Reading> {
        self.humidity.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn alerter(&self) -> &ThresholdAlerter {
        &self.alerter
    }

    pub fn series(&self, max_labels: usize) -> Series {
        self.history.series(max_labels)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            connection: self.connection_state(),
            devices: self.devices.clone(),
            device: self.device.clone(),
            temperature: self.temperature,
            humidity: self.humidity,
            limit: self.alerter.limit(),
            history_len: self.history.len(),
        }
    }

    /// Take the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<MonitorEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn transition(&mut self, to: State) {
        if self.state == to {
            return;
        }
        info!("{} -> {}", self.state, to);
        self.state = to;
        self.outbox.push(MonitorEvent::StateChanged(to));
    }

    fn invalid(&self, action: &'static str) -> TransitionError {
        TransitionError::InvalidState {
            action,
            state: self.state,
        }
    }

    /// Record an operator action that was refused.
    pub fn reject(&mut self, error: TransitionError) {
        warn!("{}", error);
        self.outbox.push(MonitorEvent::Rejected(error));
    }

    /// `Idle -> Scanning`. From `Disconnected` the session is reset to `Idle` first.
    pub fn start_scan(&mut self) -> Result<(), TransitionError> {
        match self.state {
            State::Idle => {}
            State::Disconnected => {
                self.device = None;
                self.connection_failed = false;
                self.transition(State::Idle);
            }
            _ => return Err(self.invalid("start a scan")),
        }
        self.devices.clear();
        self.transition(State::Scanning);
        Ok(())
    }

    /// Add a scan result. Unnamed and already listed devices are ignored.
    pub fn device_found(&mut self, device: DeviceDescriptor) -> bool {
        if self.state != State::Scanning
            || device.name.is_empty()
            || self.devices.iter().any(|d| d.id == device.id)
        {
            return false;
        }
        debug!("found {}", device);
        self.devices.push(device.clone());
        self.outbox.push(MonitorEvent::DeviceFound(device));
        true
    }

    /// Scan timeout or end of the result stream: `Scanning -> Idle`.
    pub fn scan_finished(&mut self) -> bool {
        if self.state != State::Scanning {
            return false;
        }
        info!("scan finished with {} device(s)", self.devices.len());
        self.transition(State::Idle);
        true
    }

    /// The transport gave up scanning: `Scanning -> Idle`, error reported.
    pub fn scan_failed(&mut self, error: ScanError) {
        warn!("scan failed: {}", error);
        self.outbox.push(MonitorEvent::ScanFailed(error));
        if self.state == State::Scanning {
            self.transition(State::Idle);
        }
    }

    /// Operator picks a scan result: `Scanning|Idle -> Connecting`.
    ///
    /// Returns the session number the connection outcome must carry.
    pub fn select(&mut self, id: DeviceId) -> Result<(u64, DeviceDescriptor), TransitionError> {
        if !matches!(self.state, State::Idle | State::Scanning) {
            return Err(self.invalid("select a device"));
        }
        let device = self
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or(TransitionError::UnknownDevice(id))?;

        self.session += 1;
        self.devices.clear();
        self.device = Some(device.clone());
        self.connection_failed = false;
        self.temperature = None;
        self.humidity = None;
        info!("connecting to {}", device);
        self.transition(State::Connecting);
        Ok((self.session, device))
    }

    /// Connect and discovery succeeded: `Connecting -> Polling`.
    ///
    /// Returns `false` when the outcome is stale and the connection should be closed.
    pub fn connected(&mut self, session: u64) -> bool {
        if session != self.session || self.state != State::Connecting {
            debug!("discarding stale connection from session {}", session);
            return false;
        }
        self.transition(State::Polling);
        true
    }

    /// Connect or discovery failed: `Connecting -> Disconnected`. No retry.
    pub fn connection_failed(&mut self, session: u64, error: ConnectionError) {
        if session != self.session || self.state != State::Connecting {
            debug!("ignoring stale connection error: {}", error);
            return;
        }
        warn!("connection failed: {}", error);
        self.connection_failed = true;
        self.outbox.push(MonitorEvent::ConnectionFailed(error));
        self.transition(State::Disconnected);
    }

    /// Apply the outcome of one characteristic read.
    ///
    /// On failure the previous value is kept and the state does not change.
    /// A successful temperature is recorded in history and checked against
    /// the alert limit. Returns `false` when the outcome was discarded.
    pub fn apply_read(
        &mut self,
        session: u64,
        quantity: Quantity,
        result: Result<Reading, ReadError>,
    ) -> bool {
        if session != self.session || self.state != State::Polling {
            return false;
        }

        let reading = match result {
            Ok(reading) => reading,
            Err(error) => {
                warn!("reading {} failed: {}", quantity, error);
                self.outbox
                    .push(MonitorEvent::ReadFailed { quantity, error });
                return true;
            }
        };

        debug!("{}", reading);
        match reading.quantity {
            Quantity::Temperature => {
                self.temperature = Some(reading);
                if let Err(e) = self.history.record(&reading) {
                    warn!("{}", e);
                }
                self.outbox.push(MonitorEvent::Reading(reading));
                if let Some(alert) = self.alerter.observe(&reading) {
                    warn!("{}", alert);
                    self.outbox.push(MonitorEvent::Alert(alert));
                }
            }
            Quantity::Humidity => {
                self.humidity = Some(reading);
                self.outbox.push(MonitorEvent::Reading(reading));
            }
        }
        true
    }

    /// Operator disconnect: `Connecting|Polling -> Disconnected`.
    pub fn disconnect(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, State::Connecting | State::Polling) {
            return Err(self.invalid("disconnect"));
        }
        self.transition(State::Disconnected);
        Ok(())
    }

    /// Transport reported the link as dropped: `Polling -> Disconnected`.
    pub fn link_lost(&mut self, session: u64) -> bool {
        if session != self.session || self.state != State::Polling {
            return false;
        }
        warn!("connection lost");
        self.transition(State::Disconnected);
        true
    }

    /// Arm the alerter from operator text.
    pub fn set_limit(&mut self, text: &str) -> Result<FixedPoint, LimitError> {
        match parse_limit(text) {
            Ok(limit) => {
                info!("alert limit set to {}", limit);
                self.alerter.set_limit(limit);
                self.outbox.push(MonitorEvent::LimitSet(limit));
                Ok(limit)
            }
            Err(e) => {
                warn!("{}", e);
                self.outbox.push(MonitorEvent::LimitRejected(e.clone()));
                Err(e)
            }
        }
    }
}
