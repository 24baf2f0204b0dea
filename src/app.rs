//! Core application runner for `thermo-monitor`.
//!
//! This module is decoupled from CLI parsing side effects and process exit
//! codes so it can be tested deterministically with an injected transport,
//! scripted operator input and in-memory output streams.

use crate::acquisition::{MonitorEvent, Snapshot, State, TransitionError};
use crate::config::{DEFAULT_MAX_LABELS, MonitorConfig, parse_period, parse_utc_offset};
use crate::device::{DeviceDescriptor, DeviceId, ParseDeviceIdError};
use crate::gauge::{ColorBand, intensity};
use crate::history::HistoryStore;
use crate::monitor::{Monitor, MonitorHandle, MonitorStopped};
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::reading::Reading;
use crate::transport::{
    ConnectionError, GattProfile, HUMIDITY_CHARACTERISTIC_UUID, SERVICE_UUID, ScanError,
    ScanFilter, TEMPERATURE_CHARACTERISTIC_UUID, Transport,
};
use clap::Parser;
use log::{debug, warn};
use std::io;
use std::io::Write;
use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::UtcOffset;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Address of the sensor to poll, e.g. AA:BB:CC:DD:EE:FF.
    /// Without --device or --name the first named device found is used.
    #[arg(long, value_name = "ADDR")]
    pub device: Option<DeviceId>,

    /// Poll the first device whose advertised name contains NAME.
    #[arg(long, conflicts_with = "device")]
    pub name: Option<String>,

    /// How long to scan before giving up.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, default_value = "10s", value_parser = parse_period)]
    pub scan_timeout: Duration,

    /// Period between two polls of temperature and humidity.
    #[arg(long, default_value = "1s", value_parser = parse_period)]
    pub poll_interval: Duration,

    /// Alert once when the temperature exceeds this limit in whole degrees, e.g. 30
    #[arg(long)]
    pub limit: Option<String>,

    /// Keep at most N temperatures in history. Unbounded by default.
    #[arg(long, value_name = "N")]
    pub history_limit: Option<usize>,

    /// Labels shown by the `history` command when none is given.
    #[arg(long, default_value_t = DEFAULT_MAX_LABELS)]
    pub max_labels: usize,

    /// Offset used for history labels, e.g. +02:00 or UTC. Defaults to local time.
    #[arg(long, value_parser = parse_utc_offset)]
    pub utc_offset: Option<UtcOffset>,

    /// UUID of the sensor's GATT service.
    #[arg(long, default_value_t = SERVICE_UUID)]
    pub service: Uuid,

    /// UUID of the temperature characteristic.
    #[arg(long, default_value_t = TEMPERATURE_CHARACTERISTIC_UUID)]
    pub temperature_characteristic: Uuid,

    /// UUID of the humidity characteristic.
    #[arg(long, default_value_t = HUMIDITY_CHARACTERISTIC_UUID)]
    pub humidity_characteristic: Uuid,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "thermo_measurement")]
    pub influxdb_measurement: String,

    /// Verbose output, print failed reads
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            scan_timeout: self.scan_timeout,
            poll_interval: self.poll_interval,
            profile: GattProfile {
                service: self.service,
                temperature: self.temperature_characteristic,
                humidity: self.humidity_characteristic,
            },
            scan_filter: ScanFilter::default(),
        }
    }

    fn history(&self) -> HistoryStore {
        let offset = self
            .utc_offset
            .unwrap_or_else(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC));
        self.history_limit
            .map_or_else(HistoryStore::new, HistoryStore::bounded)
            .with_label_offset(offset)
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no matching device found")]
    DeviceNotFound,
    #[error("connection lost")]
    LinkLost,
    #[error(transparent)]
    Stopped(#[from] MonitorStopped),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Scan,
    Select(DeviceId),
    Disconnect,
    Limit(String),
    /// Print the history with at most this many labels
    History(Option<usize>),
    Status,
    Quit,
}

/// Errors for unparseable operator input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Device(#[from] ParseDeviceIdError),
    #[error("invalid label count: {0}")]
    Labels(#[from] ParseIntError),
}

/// Parse one line of operator input. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(command, rest)| (command, rest.trim()));

    let input = match command {
        "" => return Ok(None),
        "scan" => Input::Scan,
        "select" if rest.is_empty() => return Err(InputError::Usage("select ADDR")),
        "select" => Input::Select(rest.parse()?),
        "disconnect" => Input::Disconnect,
        "limit" if rest.is_empty() => return Err(InputError::Usage("limit VALUE")),
        "limit" => Input::Limit(rest.to_string()),
        "history" if rest.is_empty() => Input::History(None),
        "history" => Input::History(Some(rest.parse()?)),
        "status" => Input::Status,
        "quit" | "exit" => Input::Quit,
        other => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Some(input))
}

enum Flow {
    Continue,
    Quit,
}

struct Session<'a> {
    options: &'a Options,
    handle: MonitorHandle,
    formatter: InfluxDbFormatter,
    /// Pick a device from the startup scan without operator input
    auto_select: bool,
    disconnect_requested: bool,
    out: &'a mut dyn Write,
    err: &'a mut dyn Write,
}

impl Session<'_> {
    fn wants(&self, device: &DeviceDescriptor) -> bool {
        match (&self.options.device, &self.options.name) {
            (Some(id), _) => device.id == *id,
            (None, Some(name)) => device.name.contains(name.as_str()),
            (None, None) => true,
        }
    }

    async fn on_event(&mut self, event: MonitorEvent) -> Result<Flow, RunError> {
        match event {
            MonitorEvent::DeviceFound(device) => {
                if self.auto_select && self.wants(&device) {
                    self.auto_select = false;
                    self.handle.select(device.id).await?;
                } else if !self.auto_select {
                    writeln!(self.err, "found {device}")?;
                }
            }
            MonitorEvent::StateChanged(State::Idle) if self.auto_select => {
                return Err(RunError::DeviceNotFound);
            }
            MonitorEvent::StateChanged(State::Disconnected) => {
                if !self.disconnect_requested {
                    return Err(RunError::LinkLost);
                }
                self.disconnect_requested = false;
                writeln!(self.err, "disconnected")?;
            }
            MonitorEvent::StateChanged(state) => debug!("state {}", state),
            MonitorEvent::Reading(reading) => self.write_reading(&reading)?,
            MonitorEvent::ReadFailed { quantity, error } => {
                if self.options.verbose {
                    writeln!(self.err, "reading {quantity} failed: {error}")?;
                }
            }
            MonitorEvent::Alert(alert) => writeln!(self.err, "alert: {alert}")?,
            MonitorEvent::ScanFailed(error) => return Err(error.into()),
            MonitorEvent::ConnectionFailed(error) => return Err(error.into()),
            MonitorEvent::LimitSet(limit) => writeln!(self.err, "alert limit set to {limit}°C")?,
            MonitorEvent::LimitRejected(error) => writeln!(self.err, "{error}")?,
            MonitorEvent::Rejected(error) => {
                if let TransitionError::InvalidState {
                    action: "disconnect",
                    ..
                } = error
                {
                    self.disconnect_requested = false;
                }
                writeln!(self.err, "{error}")?;
            }
        }
        Ok(Flow::Continue)
    }

    fn write_reading(&mut self, reading: &Reading) -> io::Result<()> {
        // The snapshot is published after the event, but the device is set
        // when connecting so it is current for every reading.
        let Some(device) = self.handle.snapshot().device else {
            return Ok(());
        };
        let line = self.formatter.format(&device, reading);
        writeln!(self.out, "{line}")
    }

    async fn on_input(&mut self, input: Input) -> Result<Flow, RunError> {
        match input {
            Input::Scan => {
                self.disconnect_requested = false;
                self.handle.start_scan().await?;
            }
            Input::Select(id) => {
                self.auto_select = false;
                self.disconnect_requested = false;
                self.handle.select(id).await?;
            }
            Input::Disconnect => {
                self.disconnect_requested = true;
                self.handle.disconnect().await?;
            }
            Input::Limit(text) => self.handle.set_limit(text).await?,
            Input::History(max_labels) => {
                let series = self
                    .handle
                    .series(max_labels.unwrap_or(self.options.max_labels))
                    .await?;
                for (label, value) in series.labels.iter().zip(&series.values) {
                    writeln!(self.err, "{label:>8} {value}")?;
                }
            }
            Input::Status => write_status(&self.handle.snapshot(), self.err)?,
            Input::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

fn write_status(snapshot: &Snapshot, err: &mut dyn Write) -> io::Result<()> {
    match &snapshot.device {
        Some(device) => writeln!(err, "{} {device}", snapshot.state)?,
        None => writeln!(err, "{}", snapshot.state)?,
    }
    if let Some(reading) = &snapshot.temperature {
        let band = ColorBand::for_value(reading.value);
        writeln!(
            err,
            "{reading} {} {:.0}%",
            band.color(),
            intensity(reading.value) * 100.0
        )?;
    }
    if let Some(reading) = &snapshot.humidity {
        writeln!(err, "{reading}")?;
    }
    if let Some(limit) = snapshot.limit {
        writeln!(err, "alert limit {limit}°C")?;
    }
    writeln!(err, "{} temperatures in history", snapshot.history_len)
}

async fn drive<R: AsyncBufRead + Unpin>(
    session: &mut Session<'_>,
    events: &mut broadcast::Receiver<MonitorEvent>,
    input: R,
) -> Result<(), RunError> {
    if let Some(limit) = &session.options.limit {
        session.handle.set_limit(limit.as_str()).await?;
    }
    session.handle.start_scan().await?;

    let mut lines = input.lines();
    let mut input_open = true;
    loop {
        let flow = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => session.on_event(event).await?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("output fell behind, skipped {} events", skipped);
                    Flow::Continue
                }
                Err(RecvError::Closed) => return Err(MonitorStopped.into()),
            },
            line = lines.next_line(), if input_open => match line? {
                Some(line) => match parse_input(&line) {
                    Ok(Some(input)) => session.on_input(input).await?,
                    Ok(None) => Flow::Continue,
                    Err(e) => {
                        writeln!(session.err, "{e}")?;
                        Flow::Continue
                    }
                },
                None => {
                    debug!("end of operator input");
                    input_open = false;
                    Flow::Continue
                }
            },
        };
        if let Flow::Quit = flow {
            return Ok(());
        }
    }
}

/// Run the monitor until the operator quits or the session ends.
///
/// - Scans on startup and connects to the first device matching `--device` or `--name`.
/// - Readings are written to `out` in InfluxDB line protocol.
/// - Alerts, command feedback and (verbose) read failures are written to `err`.
/// - Lines from `input` are operator commands; end of input leaves the monitor running.
pub async fn run_with_io<T, R>(
    options: Options,
    transport: Arc<T>,
    input: R,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
{
    let monitor = Monitor::new(transport, options.monitor_config(), options.history());
    let (handle, task) = monitor.spawn();
    let mut events = handle.subscribe();

    let mut session = Session {
        options: &options,
        handle,
        formatter: InfluxDbFormatter::new(options.influxdb_measurement.clone()),
        auto_select: true,
        disconnect_requested: false,
        out,
        err,
    };

    let result = drive(&mut session, &mut events, input).await;

    // The monitor closes the connection once the last handle is gone.
    drop(session);
    if let Err(e) = task.await {
        warn!("monitor task failed: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Call, FakeTransport, TEST_DEVICE, device, payload};
    use crate::transport::ReadError;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    const KITCHEN: DeviceId = DeviceId([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    fn options(args: &[&str]) -> Options {
        Options::try_parse_from(
            ["thermo-monitor", "--utc-offset", "UTC"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap()
    }

    /// Operator input that waits for `after`, then sends `lines`.
    fn input_after(after: Duration, lines: &str) -> BufReader<tokio_test::io::Mock> {
        BufReader::new(Builder::new().wait(after).read(lines.as_bytes()).build())
    }

    fn no_input() -> BufReader<tokio_test::io::Mock> {
        BufReader::new(Builder::new().build())
    }

    #[test]
    fn test_options_defaults() {
        let options = options(&[]);
        let config = options.monitor_config();
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.profile, GattProfile::default());
        assert_eq!(options.influxdb_measurement, "thermo_measurement");
        assert_eq!(options.max_labels, 12);
        assert!(options.device.is_none());
    }

    #[test]
    fn test_options_parse() {
        let options = options(&[
            "--device",
            "AA:BB:CC:DD:EE:FF",
            "--poll-interval",
            "500ms",
            "--scan-timeout",
            "1m",
            "--history-limit",
            "100",
            "--temperature-characteristic",
            "00002a6e-0000-1000-8000-00805f9b34fb",
        ]);
        assert_eq!(options.device, Some(TEST_DEVICE));
        assert_eq!(options.poll_interval, Duration::from_millis(500));
        assert_eq!(options.scan_timeout, Duration::from_secs(60));
        assert_eq!(options.history_limit, Some(100));
        assert_eq!(
            options.monitor_config().profile.temperature.to_string(),
            "00002a6e-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_options_reject_invalid_values() {
        let parse = |args: &[&str]| {
            Options::try_parse_from(["thermo-monitor"].into_iter().chain(args.iter().copied()))
        };
        assert!(parse(&["--poll-interval", "0s"]).is_err());
        assert!(parse(&["--device", "AA:BB"]).is_err());
        assert!(parse(&["--device", "AA:BB:CC:DD:EE:FF", "--name", "Dawg"]).is_err());
        assert!(parse(&["--service", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), Ok(None));
        assert_eq!(parse_input("scan"), Ok(Some(Input::Scan)));
        assert_eq!(
            parse_input("select AA:BB:CC:DD:EE:FF"),
            Ok(Some(Input::Select(TEST_DEVICE)))
        );
        assert_eq!(
            parse_input("limit 30 °C"),
            Ok(Some(Input::Limit("30 °C".to_string())))
        );
        assert_eq!(parse_input("history"), Ok(Some(Input::History(None))));
        assert_eq!(parse_input("history 6"), Ok(Some(Input::History(Some(6)))));
        assert_eq!(parse_input("quit\n"), Ok(Some(Input::Quit)));
    }

    #[test]
    fn test_parse_input_errors() {
        assert_eq!(parse_input("select"), Err(InputError::Usage("select ADDR")));
        assert_eq!(
            parse_input("select nope"),
            Err(InputError::Device(ParseDeviceIdError::InvalidLength(1)))
        );
        assert!(matches!(
            parse_input("history many"),
            Err(InputError::Labels(_))
        ));
        assert_eq!(
            parse_input("reboot"),
            Err(InputError::Unknown("reboot".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_writes_readings_to_out() {
        let transport = Arc::new(
            FakeTransport::new()
                .with_devices(vec![device(TEST_DEVICE, "Dawg")])
                .with_reads(TEMPERATURE_CHARACTERISTIC_UUID, vec![Ok(payload(2350))]),
        );

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&[]),
            Arc::clone(&transport),
            input_after(Duration::from_millis(2500), "quit\n"),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert!(lines.len() >= 6);
        assert!(lines[0].starts_with(
            "thermo_measurement,device=AA:BB:CC:DD:EE:FF,name=Dawg temperature=23.5 "
        ));
        assert!(lines[1].contains(" humidity=20 "));
        assert!(out.ends_with('\n'));
        assert_eq!(transport.calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn run_selects_device_by_name() {
        let transport = Arc::new(FakeTransport::new().with_devices(vec![
            device(TEST_DEVICE, "Dawg"),
            device(KITCHEN, "Kitchen sensor"),
        ]));

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&["--name", "Kitchen"]),
            Arc::clone(&transport),
            input_after(Duration::from_millis(1500), "quit\n"),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();

        assert!(transport.calls().contains(&Call::Connect(KITCHEN)));
        assert!(!transport.calls().contains(&Call::Connect(TEST_DEVICE)));
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("name=Kitchen\\ sensor"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_fails_when_no_device_matches() {
        let transport =
            Arc::new(FakeTransport::new().with_devices(vec![device(TEST_DEVICE, "Dawg")]));

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let result = run_with_io(
            options(&["--device", "11:22:33:44:55:66"]),
            transport,
            no_input(),
            &mut out,
            &mut err,
        )
        .await;

        assert!(matches!(result, Err(RunError::DeviceNotFound)));
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_connection_failure() {
        let transport = Arc::new(
            FakeTransport::new()
                .with_devices(vec![device(TEST_DEVICE, "Dawg")])
                .failing_connect(ConnectionError::Bluetooth("refused".into())),
        );

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let result = run_with_io(options(&[]), transport, no_input(), &mut out, &mut err).await;

        match result {
            Err(RunError::Connection(e)) => assert_eq!(e.to_string(), "Bluetooth error: refused"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_ends_when_link_is_lost() {
        let transport =
            Arc::new(FakeTransport::new().with_devices(vec![device(TEST_DEVICE, "Dawg")]));

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let (result, ()) = tokio::join!(
            run_with_io(
                options(&[]),
                Arc::clone(&transport),
                no_input(),
                &mut out,
                &mut err
            ),
            async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                transport.lose_link();
            }
        );

        assert!(matches!(result, Err(RunError::LinkLost)));
        assert!(!out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_operator_disconnect_keeps_running() {
        let transport =
            Arc::new(FakeTransport::new().with_devices(vec![device(TEST_DEVICE, "Dawg")]));

        let input = Builder::new()
            .wait(Duration::from_millis(1500))
            .read(b"disconnect\n")
            .wait(Duration::from_secs(3))
            .read(b"status\nquit\n")
            .build();

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&[]),
            Arc::clone(&transport),
            BufReader::new(input),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();

        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("disconnected"));
        assert!(err.contains("disconnected Dawg (AA:BB:CC:DD:EE:FF)"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_rejected_disconnect_does_not_hide_link_loss() {
        let transport = Arc::new(
            FakeTransport::new()
                .with_devices(vec![device(TEST_DEVICE, "Dawg")])
                .with_scan_delay(Duration::from_secs(2)),
        );

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let (result, ()) = tokio::join!(
            run_with_io(
                options(&[]),
                Arc::clone(&transport),
                input_after(Duration::from_millis(500), "disconnect\n"),
                &mut out,
                &mut err
            ),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                transport.lose_link();
            }
        );

        assert!(matches!(result, Err(RunError::LinkLost)));
        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("cannot disconnect while scanning"));
        assert!(!err.contains("disconnected"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_prints_alert_and_history() {
        let transport = Arc::new(
            FakeTransport::new()
                .with_devices(vec![device(TEST_DEVICE, "Dawg")])
                .with_reads(
                    TEMPERATURE_CHARACTERISTIC_UUID,
                    vec![Ok(payload(2900)), Ok(payload(3010)), Ok(payload(3500))],
                ),
        );

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&["--limit", "30°C"]),
            transport,
            input_after(Duration::from_millis(2500), "history 2\nstatus\nquit\n"),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();

        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("alert limit set to 30.00°C"));
        assert_eq!(err.matches("alert: ").count(), 1);
        assert!(err.contains("alert: temperature 30.10°C is over the limit of 30.00°C"));
        // three entries, two labels: the middle one is blank
        let history: Vec<_> = err
            .lines()
            .filter(|l| l.len() == 14 && l.as_bytes()[8] == b' ')
            .collect();
        assert_eq!(history.len(), 3);
        assert!(history[0].ends_with(" 29.00") && !history[0].starts_with(' '));
        assert_eq!(history[1], format!("{:>8} 30.10", ""));
        assert!(history[2].ends_with(" 35.00") && !history[2].starts_with(' '));
        assert!(err.contains("polling Dawg (AA:BB:CC:DD:EE:FF)"));
        assert!(err.contains("temperature 35.00°C #FF0000 88%"));
        assert!(!err.contains("alert limit 30.00°C"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_prints_read_failures_only_when_verbose() {
        let failing = || {
            Arc::new(
                FakeTransport::new()
                    .with_devices(vec![device(TEST_DEVICE, "Dawg")])
                    .with_reads(
                        HUMIDITY_CHARACTERISTIC_UUID,
                        vec![Err(ReadError::Bluetooth("timeout".into()))],
                    ),
            )
        };

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&[]),
            failing(),
            input_after(Duration::from_millis(500), "quit\n"),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();
        assert!(!String::from_utf8(err).unwrap().contains("failed"));

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&["-v"]),
            failing(),
            input_after(Duration::from_millis(500), "quit\n"),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();
        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("reading humidity failed: Bluetooth error: timeout"));
        // the temperature of the same cycle was still written
        assert!(String::from_utf8(out).unwrap().contains("temperature=20"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_bad_operator_input() {
        let transport =
            Arc::new(FakeTransport::new().with_devices(vec![device(TEST_DEVICE, "Dawg")]));

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(&[]),
            transport,
            BufReader::new(
                Builder::new()
                    .wait(Duration::from_millis(500))
                    .read(b"reboot\nscan\nlimit hot\n")
                    .wait(Duration::from_millis(500))
                    .read(b"quit\n")
                    .build(),
            ),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();

        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("unknown command 'reboot'"));
        assert!(err.contains("cannot start a scan while polling"));
        assert!(err.contains("limit contains no digits"));
    }

    #[test]
    fn test_write_status_idle() {
        let snapshot = crate::acquisition::Acquisition::default().snapshot();
        let mut err = Vec::<u8>::new();
        write_status(&snapshot, &mut err).unwrap();
        assert_eq!(
            String::from_utf8(err).unwrap(),
            "idle\n0 temperatures in history\n"
        );
    }
}
