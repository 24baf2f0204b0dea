//! Async driver for the acquisition state machine.
//!
//! A [`Monitor`] owns the injected [`Transport`] and runs a single loop that
//! multiplexes operator commands, scan results, the scan deadline and the
//! outcomes of background tasks. Connecting and polling run in spawned tasks
//! tagged with the session they belong to; outcomes from an earlier session,
//! or arriving after the state moved on, are dropped by [`Acquisition`].
//!
//! The presentation layer talks to a running monitor through a
//! [`MonitorHandle`].

use crate::acquisition::{Acquisition, MonitorEvent, Snapshot};
use crate::config::MonitorConfig;
use crate::decoder::decode;
use crate::device::{DeviceDescriptor, DeviceId};
use crate::history::{HistoryStore, Series};
use crate::reading::{Quantity, Reading};
use crate::transport::{
    ConnectionError, GattProfile, ReadError, ScanError, ScanStream, Transport,
};
use log::debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Events buffered per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Operator commands buffered before senders wait.
pub const COMMAND_CHANNEL_BUFFER_SIZE: usize = 16;

/// Operator actions.
#[derive(Debug)]
pub enum Command {
    StartScan,
    Select(DeviceId),
    Disconnect,
    /// Free-form limit text, see [`crate::alert::parse_limit`]
    SetLimit(String),
    Series {
        max_labels: usize,
        reply: oneshot::Sender<Series>,
    },
}

/// Outcomes reported back by spawned tasks.
enum Internal<C> {
    Connected {
        session: u64,
        result: Result<Arc<C>, ConnectionError>,
    },
    Read {
        session: u64,
        quantity: Quantity,
        result: Result<Reading, ReadError>,
    },
    LinkLost {
        session: u64,
    },
}

enum Step<C> {
    Command(Command),
    Scan(Option<Result<DeviceDescriptor, ScanError>>),
    ScanTimeout,
    Internal(Internal<C>),
}

/// The live connection and the tasks serving it.
struct Link<C> {
    connection: Arc<C>,
    poller: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// Acquisition state machine bound to a transport.
pub struct Monitor<T: Transport> {
    transport: Arc<T>,
    config: MonitorConfig,
    acquisition: Acquisition,
    events: broadcast::Sender<MonitorEvent>,
    snapshot: watch::Sender<Snapshot>,
    internal_tx: mpsc::UnboundedSender<Internal<T::Connection>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<T::Connection>>,
    scan: Option<ScanStream>,
    scan_deadline: Option<Instant>,
    connecting: Vec<JoinHandle<()>>,
    link: Option<Link<T::Connection>>,
}

impl<T: Transport> Monitor<T> {
    pub fn new(transport: Arc<T>, config: MonitorConfig, history: HistoryStore) -> Self {
        let acquisition = Acquisition::new(history);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot, _) = watch::channel(acquisition.snapshot());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            config,
            acquisition,
            events,
            snapshot,
            internal_tx,
            internal_rx,
            scan: None,
            scan_deadline: None,
            connecting: Vec::new(),
            link: None,
        }
    }

    pub fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    /// Run the monitor on the current runtime.
    ///
    /// The monitor stops, closing any connection, once every clone of the
    /// returned handle has been dropped.
    pub fn spawn(self) -> (MonitorHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER_SIZE);
        let handle = MonitorHandle {
            commands,
            events: self.events.subscribe(),
            snapshot: self.snapshot.subscribe(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    /// Process commands until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(step) = self.next_step(&mut commands).await {
            self.apply(step).await;
            self.publish();
        }
        self.stop_scan().await;
        self.close_link().await;
        self.release_pending().await;
        debug!("monitor stopped");
    }

    /// Wait for connect tasks still running and close whatever they opened.
    async fn release_pending(&mut self) {
        self.internal_rx.close();
        for task in self.connecting.drain(..) {
            let _ = task.await;
        }
        while let Ok(internal) = self.internal_rx.try_recv() {
            if let Internal::Connected {
                result: Ok(connection),
                ..
            } = internal
            {
                self.transport.disconnect(&connection).await;
            }
        }
    }

    async fn next_step(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Option<Step<T::Connection>> {
        let deadline = self.scan_deadline;
        tokio::select! {
            biased;
            command = commands.recv() => command.map(Step::Command),
            Some(internal) = self.internal_rx.recv() => Some(Step::Internal(internal)),
            result = next_scan_result(&mut self.scan) => Some(Step::Scan(result)),
            () = sleep_until_deadline(deadline) => Some(Step::ScanTimeout),
        }
    }

    async fn apply(&mut self, step: Step<T::Connection>) {
        match step {
            Step::Command(command) => self.handle(command).await,
            Step::Scan(Some(Ok(device))) => {
                self.acquisition.device_found(device);
            }
            Step::Scan(Some(Err(error))) => {
                self.stop_scan().await;
                self.acquisition.scan_failed(error);
            }
            Step::Scan(None) | Step::ScanTimeout => {
                self.stop_scan().await;
                self.acquisition.scan_finished();
            }
            Step::Internal(Internal::Connected { session, result }) => match result {
                Ok(connection) => {
                    if self.acquisition.connected(session) {
                        self.open_link(session, connection);
                    } else {
                        self.transport.disconnect(&connection).await;
                    }
                }
                Err(error) => self.acquisition.connection_failed(session, error),
            },
            Step::Internal(Internal::Read {
                session,
                quantity,
                result,
            }) => {
                self.acquisition.apply_read(session, quantity, result);
            }
            Step::Internal(Internal::LinkLost { session }) => {
                if self.acquisition.link_lost(session) {
                    self.close_link().await;
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::StartScan => self.start_scan().await,
            Command::Select(id) => self.select(id).await,
            Command::Disconnect => match self.acquisition.disconnect() {
                Ok(()) => self.close_link().await,
                Err(e) => self.acquisition.reject(e),
            },
            Command::SetLimit(text) => {
                // outcome is reported as an event
                let _ = self.acquisition.set_limit(&text);
            }
            Command::Series { max_labels, reply } => {
                let _ = reply.send(self.acquisition.series(max_labels));
            }
        }
    }

    fn publish(&mut self) {
        for event in self.acquisition.drain_events() {
            // Having no subscriber is not an error.
            let _ = self.events.send(event);
        }
        self.snapshot.send_replace(self.acquisition.snapshot());
    }

    async fn start_scan(&mut self) {
        if let Err(e) = self.acquisition.start_scan() {
            self.acquisition.reject(e);
            return;
        }
        match self.transport.scan(self.config.scan_filter.clone()).await {
            Ok(stream) => {
                self.scan = Some(stream);
                self.scan_deadline = Some(Instant::now() + self.config.scan_timeout);
            }
            Err(error) => self.acquisition.scan_failed(error),
        }
    }

    async fn stop_scan(&mut self) {
        self.scan_deadline = None;
        if self.scan.take().is_some() {
            self.transport.stop_scan().await;
        }
    }

    async fn select(&mut self, id: DeviceId) {
        let (session, device) = match self.acquisition.select(id) {
            Ok(selected) => selected,
            Err(e) => {
                self.acquisition.reject(e);
                return;
            }
        };
        self.stop_scan().await;

        let transport = Arc::clone(&self.transport);
        let profile = self.config.profile;
        let tx = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            let result = establish(transport.as_ref(), &device, &profile)
                .await
                .map(Arc::new);
            // Nobody is left to own the connection once the monitor stopped.
            if let Err(mpsc::error::SendError(Internal::Connected {
                result: Ok(connection),
                ..
            })) = tx.send(Internal::Connected { session, result })
            {
                debug!("monitor stopped while connecting to {}", device);
                transport.disconnect(&connection).await;
            }
        });
        self.connecting.retain(|task| !task.is_finished());
        self.connecting.push(task);
    }

    fn open_link(&mut self, session: u64, connection: Arc<T::Connection>) {
        let poller = tokio::spawn(poll_loop(
            Arc::clone(&self.transport),
            Arc::clone(&connection),
            self.config.profile,
            self.config.poll_interval,
            session,
            self.internal_tx.clone(),
        ));

        let transport = Arc::clone(&self.transport);
        let watched = Arc::clone(&connection);
        let tx = self.internal_tx.clone();
        let watcher = tokio::spawn(async move {
            transport.link_lost(&watched).await;
            let _ = tx.send(Internal::LinkLost { session });
        });

        self.link = Some(Link {
            connection,
            poller,
            watcher,
        });
    }

    async fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.poller.abort();
            link.watcher.abort();
            self.transport.disconnect(&link.connection).await;
        }
    }
}

async fn next_scan_result(
    scan: &mut Option<ScanStream>,
) -> Option<Result<DeviceDescriptor, ScanError>> {
    match scan {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Connect and verify the sensor's characteristics are present.
async fn establish<T: Transport>(
    transport: &T,
    device: &DeviceDescriptor,
    profile: &GattProfile,
) -> Result<T::Connection, ConnectionError> {
    let connection = transport.connect(device).await?;
    if let Err(error) = transport.discover_services(&connection, profile).await {
        transport.disconnect(&connection).await;
        return Err(error.into());
    }
    Ok(connection)
}

/// Read and decode one quantity.
pub async fn read_quantity<T: Transport>(
    transport: &T,
    connection: &T::Connection,
    profile: &GattProfile,
    quantity: Quantity,
) -> Result<Reading, ReadError> {
    let raw = transport
        .read_characteristic(connection, profile.service, profile.characteristic(quantity))
        .await?;
    let value = decode(&raw)?;
    Ok(Reading::new(quantity, value, SystemTime::now()))
}

/// Poll temperature then humidity every `period`.
///
/// Both reads of a cycle settle before the next tick is awaited, and late
/// ticks are delayed rather than bunched, so cycles never overlap.
async fn poll_loop<T: Transport>(
    transport: Arc<T>,
    connection: Arc<T::Connection>,
    profile: GattProfile,
    period: Duration,
    session: u64,
    tx: mpsc::UnboundedSender<Internal<T::Connection>>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        for quantity in [Quantity::Temperature, Quantity::Humidity] {
            let result =
                read_quantity(transport.as_ref(), connection.as_ref(), &profile, quantity).await;
            if tx
                .send(Internal::Read {
                    session,
                    quantity,
                    result,
                })
                .is_err()
            {
                return;
            }
        }
    }
}

/// Error returned once the monitor task has stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("monitor has stopped")]
pub struct MonitorStopped;

/// Cloneable front end to a running [`Monitor`].
#[derive(Debug)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Receiver<MonitorEvent>,
    snapshot: watch::Receiver<Snapshot>,
}

impl Clone for MonitorHandle {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.resubscribe(),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl MonitorHandle {
    pub async fn send(&self, command: Command) -> Result<(), MonitorStopped> {
        self.commands.send(command).await.map_err(|_| MonitorStopped)
    }

    pub async fn start_scan(&self) -> Result<(), MonitorStopped> {
        self.send(Command::StartScan).await
    }

    pub async fn select(&self, id: DeviceId) -> Result<(), MonitorStopped> {
        self.send(Command::Select(id)).await
    }

    pub async fn disconnect(&self) -> Result<(), MonitorStopped> {
        self.send(Command::Disconnect).await
    }

    pub async fn set_limit(&self, text: impl Into<String>) -> Result<(), MonitorStopped> {
        self.send(Command::SetLimit(text.into())).await
    }

    /// History series with at most `max_labels` visible labels.
    pub async fn series(&self, max_labels: usize) -> Result<Series, MonitorStopped> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Series { max_labels, reply }).await?;
        rx.await.map_err(|_| MonitorStopped)
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.resubscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }
}
