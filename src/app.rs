use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{BtleplugTransport, FakeTransport};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a fixture-driven transport for hardware-free runs.
#[must_use]
pub fn fake_transport(fake_args: FakeArgs) -> FakeTransport {
    FakeTransport::new(fake_args.into_transport_config())
}

/// BLE transport a CLI run talks to.
#[derive(Debug)]
pub enum TransportBackend {
    /// The host Bluetooth stack, opened when a command first needs it.
    Real,
    /// A fixture-driven fake transport.
    Fake(FakeTransport),
}

impl TransportBackend {
    /// Picks the fake transport when fake arguments are present.
    #[must_use]
    pub fn from_fake_args(fake_args: Option<FakeArgs>) -> Self {
        match fake_args {
            Some(fake_args) => Self::Fake(fake_transport(fake_args)),
            None => Self::Real,
        }
    }
}

/// Runs the CLI command.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = hrm::Args::try_parse_from([
///     "hrm",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:BB:CC|Polar H10|-43|180d",
///     "listen",
///     "--max-readings",
///     "2",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = hrm::TransportBackend::from_fake_args(maybe_fake_args);
/// let mut out = Vec::new();
/// hrm::run(command, &mut out, backend, hrm::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the session fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    backend: TransportBackend,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, backend, None, output_format).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the session fails, or
/// output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    backend: TransportBackend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        backend,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the session fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: TransportBackend,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, backend, None, output_format)
        .await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl hrm::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = hrm::Args::try_parse_from(["hrm", "--log-level", "trace", "decode", "0048"])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let mut out = Vec::new();
/// hrm::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     hrm::TransportBackend::from_fake_args(maybe_fake_args),
///     log_level,
///     hrm::OutputFormat::Json,
/// ).await?;
/// assert_eq!(b"{\"heart_rate_bpm\":72,\"rr_intervals\":[]}\n".as_slice(), out);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the session fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, backend),
    level = "info",
    fields(command = command.name(), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: TransportBackend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "hrm",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Decode(args) => {
            crate::cli::decode::run(&args, out, terminal_client, output_format)
        }
        Command::Listen(args) => match backend {
            TransportBackend::Real => {
                let transport = BtleplugTransport::new().await?;
                crate::cli::listen::run(transport, &args, out, terminal_client, output_format)
                    .await
            }
            TransportBackend::Fake(transport) => {
                crate::cli::listen::run(transport, &args, out, terminal_client, output_format)
                    .await
            }
        },
    }
}
