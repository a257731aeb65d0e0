mod app;
mod cli;
mod error;
mod hw;
mod measurement;
mod protocol;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    TransportBackend, fake_transport, run, run_with_clients, run_with_clients_and_log_level,
    run_with_log_level,
};
pub use cli::{Args, Command, DecodeArgs, FakeArgs, ListenArgs, LogLevel, OutputFormat};
pub use error::{FixtureError, SessionError, TransportError};
pub use hw::{
    BtleplugDevice, BtleplugTransport, ConnectionState, DeviceFilter, DeviceIdentity,
    FailurePoint, FakeCharacteristic, FakeDevice, FakeService, FakeTransport, GattProfile,
    ListenStopReason, ListenSummary, NotificationStream, SessionConfig, SessionController,
    SessionEvent, Transport, TransportEvent,
};
pub use measurement::{
    HeartRateMeasurement, MeasurementDecodeError, MeasurementDecoder, MeasurementField,
    MeasurementFlags, SensorContact,
};
pub use protocol::GattId;
pub use terminal::TerminalClient;
