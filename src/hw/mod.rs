mod btleplug_backend;
mod fake_backend;
mod model;
mod session;
mod transport;

pub use self::btleplug_backend::{BtleplugDevice, BtleplugTransport};
pub use self::fake_backend::{
    FailurePoint, FakeCharacteristic, FakeDevice, FakeService, FakeTransport,
};
pub(crate) use self::fake_backend::{
    FakeTransportConfig, HexPayload, LinkEnd, NotificationPayloads, ScanFixture,
};
pub use self::model::{ConnectionState, DeviceIdentity, ListenStopReason, ListenSummary};
pub use self::session::{GattProfile, SessionConfig, SessionController, SessionEvent};
pub use self::transport::{DeviceFilter, NotificationStream, Transport, TransportEvent};
