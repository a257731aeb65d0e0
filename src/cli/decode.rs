use std::io;

use anyhow::{Context, Result};
use clap::Args;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::error::FixtureError;
use crate::hw::HexPayload;
use crate::measurement::MeasurementDecoder;
use crate::terminal::TerminalClient;
use crate::utils::format_hex;

use super::ui::{Painter, ReadingView};

/// Arguments for the `decode` command.
#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Heart Rate Measurement value as hexadecimal bytes, e.g. `164A006403`.
    #[arg(value_name = "HEX")]
    payload: HexPayload,
}

impl DecodeArgs {
    /// Creates decode arguments from a hexadecimal payload.
    ///
    /// # Errors
    ///
    /// Returns an error when `payload` is not valid hexadecimal.
    pub fn new(payload: &str) -> Result<Self, FixtureError> {
        Ok(Self {
            payload: payload.parse()?,
        })
    }
}

/// Executes the `decode` command.
#[instrument(skip_all, level = "debug", fields(?output_format))]
pub(crate) fn run<W>(
    args: &DecodeArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let payload = args.payload.as_bytes();
    let reading = MeasurementDecoder::decode(payload)
        .with_context(|| format!("cannot decode payload {}", format_hex(payload)))?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ReadingView::new(&reading, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &reading)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
