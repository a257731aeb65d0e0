use thiserror::Error;
use uuid::Uuid;

use crate::hw::{ConnectionState, FailurePoint};

/// Errors reported by the platform BLE transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no device advertising {filter} was found in the fake fixture")]
    NoMatchingFixtureDevice { filter: String },
    #[error("service {uuid} was not found on the connected device")]
    MissingService { uuid: Uuid },
    #[error("notify-capable characteristic {uuid} was not found on the heart-rate service")]
    MissingCharacteristic { uuid: Uuid },
    #[error("the fake fixture rejected the {step} step")]
    InjectedFailure { step: FailurePoint },
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
}

/// Errors returned by session-controller operations.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum SessionError {
    #[error("a session is already in progress (state: {state})")]
    AlreadyStarted { state: ConnectionState },
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain five pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("advertised service `{value}` is not a 16-bit hexadecimal assigned number")]
    InvalidServiceId { value: String },
    #[error("hex payload `{value}` is invalid")]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
    },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
