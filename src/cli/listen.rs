use std::future::Future;
use std::io;
use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_with::hex::Hex;
use serde_with::serde_as;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, instrument, trace};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cli::OutputFormat;
use crate::error::TransportError;
use crate::hw::{
    DeviceIdentity, GattProfile, ListenStopReason, ListenSummary, SessionConfig, SessionController,
    SessionEvent, Transport,
};
use crate::measurement::{HeartRateMeasurement, MeasurementDecodeError};
use crate::terminal::TerminalClient;

use super::ui::{ListenReadyView, ListenSummaryView, Painter, ReadingLineView, RejectedLineView};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Stop after this many decoded readings. If omitted, listen until Ctrl+C or disconnect.
    #[arg(long)]
    max_readings: Option<NonZeroUsize>,
    /// Only connect to sensors whose advertised name starts with this prefix.
    #[arg(long)]
    name_prefix: Option<String>,
}

impl ListenArgs {
    /// Creates listen arguments with an optional reading limit.
    #[must_use]
    pub fn new(max_readings: Option<NonZeroUsize>) -> Self {
        Self {
            max_readings,
            name_prefix: None,
        }
    }

    /// Restricts discovery to sensors whose local name starts with `prefix`.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .maybe_name_prefix(self.name_prefix.clone())
            .build()
    }
}

/// One line of `listen` output in JSON mode.
#[serde_as]
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ListenRecord<'a> {
    Connected {
        device: &'a DeviceIdentity,
    },
    Reading {
        index: usize,
        #[serde(flatten)]
        reading: &'a HeartRateMeasurement,
    },
    Rejected {
        #[serde_as(as = "Hex")]
        payload: &'a [u8],
        error: String,
    },
    Summary(&'a ListenSummary),
}

enum ConnectOutcome {
    Connected(DeviceIdentity),
    Interrupted,
    Failed(TransportError),
    Closed,
}

/// Executes the `listen` command against `transport`.
#[instrument(skip_all, level = "debug", fields(?output_format))]
pub(crate) async fn run<T, W>(
    transport: T,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    T: Transport,
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let mut printer = ListenPrinter {
        out,
        painter: &painter,
        output_format,
    };
    let config = args.session_config();
    let profile = config.profile();
    let (controller, mut events) = SessionController::new(transport, config);
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());

    controller.start()?;
    let device = match wait_for_connection(&mut events, &mut ctrl_c).await {
        Ok(ConnectOutcome::Connected(device)) => device,
        Ok(ConnectOutcome::Interrupted) => {
            release(&controller).await;
            let summary = ListenSummary::new(None, 0, 0, ListenStopReason::Interrupted);
            return printer.summary(&summary);
        }
        Ok(ConnectOutcome::Failed(error)) => {
            return Err(error).context("failed to start a heart-rate session");
        }
        Ok(ConnectOutcome::Closed) => {
            anyhow::bail!("session ended before a sensor connected");
        }
        Err(error) => {
            release(&controller).await;
            return Err(error.into());
        }
    };
    printer.ready(&device, profile)?;

    let mut received = 0usize;
    let mut rejected = 0usize;
    let stop_reason = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(source) = signal {
                    release(&controller).await;
                    return Err(TransportError::CtrlC { source }.into());
                }
                break ListenStopReason::Interrupted;
            }
            event = events.recv() => match event {
                Some(SessionEvent::ReadingReceived(reading)) => {
                    received += 1;
                    printer.reading(received, &reading)?;
                    if let Some(limit) = args.max_readings
                        && received >= limit.get()
                    {
                        break ListenStopReason::ReachedLimit(limit.get());
                    }
                }
                Some(SessionEvent::ReadingRejected { payload, error }) => {
                    rejected += 1;
                    printer.rejected(&payload, &error)?;
                }
                Some(SessionEvent::SessionFailed(error)) => {
                    release(&controller).await;
                    return Err(error).context("heart-rate session failed");
                }
                Some(SessionEvent::DeviceDisconnected) | None => {
                    break ListenStopReason::PeerDisconnected;
                }
                Some(SessionEvent::DeviceConnected(identity)) => {
                    trace!(device_id = identity.device_id(), "ignoring repeated connect event");
                }
            },
        }
    };

    info!(%stop_reason, received, rejected, "listen finished");
    release(&controller).await;
    let summary = ListenSummary::new(Some(device), received, rejected, stop_reason);
    printer.summary(&summary)
}

#[instrument(skip_all, level = "info")]
async fn wait_for_connection<C>(
    events: &mut UnboundedReceiver<SessionEvent>,
    ctrl_c: &mut C,
) -> Result<ConnectOutcome, TransportError>
where
    C: Future<Output = io::Result<()>> + Unpin,
{
    tracing::Span::current().pb_set_message("Scanning for heart-rate sensors");
    loop {
        tokio::select! {
            signal = &mut *ctrl_c => {
                signal.map_err(|source| TransportError::CtrlC { source })?;
                return Ok(ConnectOutcome::Interrupted);
            }
            event = events.recv() => match event {
                Some(SessionEvent::DeviceConnected(device)) => {
                    return Ok(ConnectOutcome::Connected(device));
                }
                Some(SessionEvent::SessionFailed(error)) => {
                    return Ok(ConnectOutcome::Failed(error));
                }
                Some(other) => debug!(?other, "ignoring event before connection"),
                None => return Ok(ConnectOutcome::Closed),
            },
        }
    }
}

async fn release<T: Transport>(controller: &SessionController<T>) {
    controller.stop();
    controller.wait_until_idle().await;
}

struct ListenPrinter<'a, W> {
    out: &'a mut W,
    painter: &'a Painter,
    output_format: OutputFormat,
}

impl<W: io::Write> ListenPrinter<'_, W> {
    fn ready(&mut self, device: &DeviceIdentity, profile: GattProfile) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                let view = ListenReadyView::new(device, profile, self.painter);
                writeln!(self.out, "{view}")?;
                Ok(())
            }
            OutputFormat::Json => self.record(&ListenRecord::Connected { device }),
        }
    }

    fn reading(&mut self, index: usize, reading: &HeartRateMeasurement) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                let view = ReadingLineView::new(index, reading, self.painter);
                writeln!(self.out, "{view}")?;
                Ok(())
            }
            OutputFormat::Json => self.record(&ListenRecord::Reading { index, reading }),
        }
    }

    fn rejected(&mut self, payload: &[u8], error: &MeasurementDecodeError) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                let view = RejectedLineView::new(payload, error, self.painter);
                writeln!(self.out, "{view}")?;
                Ok(())
            }
            OutputFormat::Json => self.record(&ListenRecord::Rejected {
                payload,
                error: error.to_string(),
            }),
        }
    }

    fn summary(&mut self, summary: &ListenSummary) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", ListenSummaryView::new(summary, self.painter))?;
                Ok(())
            }
            OutputFormat::Json => self.record(&ListenRecord::Summary(summary)),
        }
    }

    fn record(&mut self, record: &ListenRecord<'_>) -> Result<()> {
        serde_json::to_writer(&mut *self.out, record)?;
        writeln!(self.out)?;
        Ok(())
    }
}
