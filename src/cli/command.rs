use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::decode::DecodeArgs;
use crate::cli::listen::ListenArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FailurePoint, FakeTransportConfig, LinkEnd, NotificationPayloads, ScanFixture};

/// Command-line options for the heart-rate monitor.
#[derive(Debug, Parser)]
#[command(
    name = "hrm",
    about = "Stream readings from Bluetooth LE heart-rate sensors."
)]
pub struct Args {
    /// Log level; overrides `RUST_LOG` when given.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the fake BLE transport with fixture-driven discovery and notifications.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `adapter|device_id|local_name|rssi|services;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake measurement notifications as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Artificial fake discovery delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    /// Artificial fake GATT connect delay.
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_connect_delay: Option<Duration>,
    /// Artificial fake subscribe delay.
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_subscribe_delay: Option<Duration>,
    /// Delay before each fake notification (e.g. `1s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_notification_interval: Option<Duration>,
    /// Keeps the fake link up after the last notification instead of dropping it.
    #[arg(long, global = true, requires = "fake")]
    fake_stay_connected: bool,
    /// Makes the fake transport fail at one connect-sequence step.
    #[arg(long, global = true, requires = "fake", value_enum)]
    fake_fail_at: Option<FailurePoint>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use hrm::{Args, Command, ListenArgs};
    ///
    /// let listen = Args::new(Command::Listen(ListenArgs::new(None)));
    /// let _ = listen;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_discovery_delay: None,
            fake_connect_delay: None,
            fake_subscribe_delay: None,
            fake_notification_interval: None,
            fake_stay_connected: false,
            fake_fail_at: None,
            command,
        }
    }

    /// Enables fake transport mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan,
            notifications,
            discovery_delay,
            connect_delay,
            subscribe_delay,
            notification_interval,
            stay_connected,
            fail_at,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan);
        self.fake_notifications = notifications;
        self.fake_discovery_delay = Some(discovery_delay);
        self.fake_connect_delay = Some(connect_delay);
        self.fake_subscribe_delay = Some(subscribe_delay);
        self.fake_notification_interval = Some(notification_interval);
        self.fake_stay_connected = stay_connected;
        self.fake_fail_at = fail_at;
        self
    }

    /// Returns the explicit log level, if one was given.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicit output format, if one was given.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed CLI arguments into command and optional fake-transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_discovery_delay,
            fake_connect_delay,
            fake_subscribe_delay,
            fake_notification_interval,
            fake_stay_connected,
            fake_fail_at,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan,
                notifications: fake_notifications,
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
                connect_delay: fake_connect_delay.unwrap_or(Duration::ZERO),
                subscribe_delay: fake_subscribe_delay.unwrap_or(Duration::ZERO),
                notification_interval: fake_notification_interval.unwrap_or(Duration::ZERO),
                stay_connected: fake_stay_connected,
                fail_at: fake_fail_at,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake transport arguments for programmatic runs.
///
/// Without `notifications` the fake sensor sends a short built-in sequence.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default)]
    connect_delay: Duration,
    #[builder(default)]
    subscribe_delay: Duration,
    #[builder(default)]
    notification_interval: Duration,
    #[builder(default)]
    stay_connected: bool,
    fail_at: Option<FailurePoint>,
}

impl FakeArgs {
    pub(crate) fn into_transport_config(self) -> FakeTransportConfig {
        let Self {
            scan,
            notifications,
            discovery_delay,
            connect_delay,
            subscribe_delay,
            notification_interval,
            stay_connected,
            fail_at,
        } = self;

        let link_end = if stay_connected {
            LinkEnd::StayConnected
        } else {
            LinkEnd::PeerDisconnect
        };
        FakeTransportConfig::builder()
            .scan_fixture(scan)
            .maybe_notifications(notifications)
            .discovery_delay(discovery_delay)
            .connect_delay(connect_delay)
            .subscribe_delay(subscribe_delay)
            .notification_interval(notification_interval)
            .link_end(link_end)
            .maybe_fail_at(fail_at)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for the first heart-rate sensor, connect, and stream its readings.
    Listen(ListenArgs),
    /// Decode one Heart Rate Measurement value given as hexadecimal bytes.
    Decode(DecodeArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Listen(_args) => "listen",
            Command::Decode(_args) => "decode",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering used for command output on stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables and lines for humans.
    Pretty,
    /// One JSON document per line.
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    const SCAN: &str = "hci0|AA:BB:CC|Polar H10|-43|180d";

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["hrm", "--fake", "listen"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result = Args::try_parse_from(["hrm", "--fake-notifications", "0048", "listen"]);

        let error = result.expect_err("fake payload flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn invalid_fake_scan_is_a_value_error() {
        let result = Args::try_parse_from(["hrm", "--fake", "--fake-scan", "hci0|AA", "listen"]);

        let error = result.expect_err("malformed fixture should fail argument parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "hrm",
            "--fake",
            "--fake-scan",
            SCAN,
            "--fake-fail-at",
            "subscribe",
            "--fake-stay-connected",
            "listen",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Listen(_));
        let fake_args = fake_args.expect("fake settings should be present");
        assert_eq!(Some(FailurePoint::Subscribe), fake_args.fail_at);
        assert!(fake_args.stay_connected);
    }

    #[test]
    fn fake_step_delays_parse_as_durations() {
        let cli = Args::try_parse_from([
            "hrm",
            "--fake",
            "--fake-scan",
            SCAN,
            "--fake-connect-delay",
            "250ms",
            "--fake-subscribe-delay",
            "1s",
            "listen",
        ])
        .expect("valid delays should parse");

        let (_command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        let fake_args = fake_args.expect("fake settings should be present");
        assert_eq!(Duration::from_millis(250), fake_args.connect_delay);
        assert_eq!(Duration::from_secs(1), fake_args.subscribe_delay);
        assert_eq!(Duration::ZERO, fake_args.discovery_delay);
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Args::try_parse_from(["hrm", "decode", "0048", "--output", "json"])
            .expect("global flags should parse after the subcommand");

        assert_eq!(Some(OutputFormat::Json), cli.output_format());
        assert_eq!(None, cli.log_level());
    }

    #[test]
    fn log_level_maps_to_level_filter() {
        assert_eq!(LevelFilter::DEBUG, LogLevel::Debug.as_level_filter());
    }
}
