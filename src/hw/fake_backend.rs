use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use btleplug::api::bleuuid::uuid_from_u16;
use clap::ValueEnum;
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::model::DeviceIdentity;
use super::transport::{DeviceFilter, NotificationStream, Transport, TransportEvent};
use crate::error::{FixtureError, TransportError};
use crate::protocol::{self, GattId, GattKind};

const DEFAULT_NOTIFICATIONS: [&[u8]; 3] = [
    &[0x00, 0x48],
    &[0x16, 0x4A, 0x64, 0x03, 0x70, 0x03],
    &[0x06, 0x4C],
];

/// Connect-sequence step at which the fake transport can be told to fail.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, ValueEnum)]
pub enum FailurePoint {
    #[strum(to_string = "discovery")]
    Discovery,
    #[strum(to_string = "connect")]
    Connect,
    #[strum(to_string = "service lookup")]
    Service,
    #[strum(to_string = "characteristic lookup")]
    Characteristic,
    #[strum(to_string = "subscribe")]
    Subscribe,
}

/// What the fake link does once every fixture notification was delivered.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub(crate) enum LinkEnd {
    /// The peripheral drops the connection.
    #[default]
    PeerDisconnect,
    /// The link stays up until the session is stopped.
    StayConnected,
}

/// One advertised device in a fake scan fixture.
#[derive(Debug, Clone, Eq, PartialEq)]
struct FixtureDevice {
    identity: DeviceIdentity,
    advertised_services: Vec<Uuid>,
}

/// Parsed fake scan fixture records.
#[derive(Debug, Clone)]
pub(crate) struct ScanFixture {
    devices: Vec<FixtureDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// Hex payload given on the command line.
#[derive(Debug, Clone)]
pub(crate) struct HexPayload {
    payload: Vec<u8>,
}

impl HexPayload {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.payload
    }
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payload = parse_hex(value)?;
        Ok(Self { payload })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Settings for constructing a fake transport.
#[derive(Debug, Builder)]
pub(crate) struct FakeTransportConfig {
    scan_fixture: ScanFixture,
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
    link_end: LinkEnd,
    fail_at: Option<FailurePoint>,
}

/// Fixture-driven transport used in tests and hardware-free runs.
///
/// Clones share state, so a clone kept by a test observes calls made through
/// the controller.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    inner: Arc<FakeTransportInner>,
}

#[derive(Debug)]
struct FakeTransportInner {
    devices: Vec<FixtureDevice>,
    notifications: Vec<Vec<u8>>,
    discovery_delay: Duration,
    connect_delay: Duration,
    subscribe_delay: Duration,
    notification_interval: Duration,
    link_end: LinkEnd,
    fail_at: Option<FailurePoint>,
    disconnect_calls: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new(config: FakeTransportConfig) -> Self {
        let notifications = config.notifications.map_or_else(
            || Vec::from(DEFAULT_NOTIFICATIONS.map(<[u8]>::to_vec)),
            Into::into,
        );

        Self {
            inner: Arc::new(FakeTransportInner {
                devices: config.scan_fixture.devices,
                notifications,
                discovery_delay: config.discovery_delay,
                connect_delay: config.connect_delay,
                subscribe_delay: config.subscribe_delay,
                notification_interval: config.notification_interval,
                link_end: config.link_end,
                fail_at: config.fail_at,
                disconnect_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns how many times `disconnect` was called.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    fn check(&self, step: FailurePoint) -> Result<(), TransportError> {
        if self.inner.fail_at == Some(step) {
            debug!(%step, "injecting fixture failure");
            return Err(TransportError::InjectedFailure { step });
        }
        Ok(())
    }
}

/// Device handle returned by the fake transport.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    identity: DeviceIdentity,
}

/// Service handle returned by the fake transport.
#[derive(Debug)]
pub struct FakeService {
    id: GattId,
}

/// Characteristic handle returned by the fake transport.
#[derive(Debug)]
pub struct FakeCharacteristic {
    uuid: Uuid,
}

#[async_trait]
impl Transport for FakeTransport {
    type Device = FakeDevice;
    type Service = FakeService;
    type Characteristic = FakeCharacteristic;

    #[instrument(skip(self), level = "debug", fields(%filter))]
    async fn request_device(&self, filter: &DeviceFilter) -> Result<FakeDevice, TransportError> {
        pause(self.inner.discovery_delay).await;
        self.check(FailurePoint::Discovery)?;

        self.inner
            .devices
            .iter()
            .find(|device| {
                filter.matches(&device.advertised_services, device.identity.local_name())
            })
            .map(|device| FakeDevice {
                identity: device.identity.clone(),
            })
            .ok_or_else(|| TransportError::NoMatchingFixtureDevice {
                filter: filter.to_string(),
            })
    }

    fn device_identity(&self, device: &FakeDevice) -> DeviceIdentity {
        device.identity.clone()
    }

    async fn connect_gatt(&self, _device: &FakeDevice) -> Result<(), TransportError> {
        pause(self.inner.connect_delay).await;
        self.check(FailurePoint::Connect)
    }

    async fn get_service(
        &self,
        _device: &FakeDevice,
        uuid: Uuid,
    ) -> Result<FakeService, TransportError> {
        self.check(FailurePoint::Service)?;
        match protocol::gatt_id_for_uuid(uuid) {
            Some(id) if protocol::gatt_metadata(id).kind() == GattKind::Service => {
                Ok(FakeService { id })
            }
            _ => Err(TransportError::MissingService { uuid }),
        }
    }

    async fn get_characteristic(
        &self,
        service: &FakeService,
        uuid: Uuid,
    ) -> Result<FakeCharacteristic, TransportError> {
        self.check(FailurePoint::Characteristic)?;
        match (service.id, protocol::gatt_id_for_uuid(uuid)) {
            (GattId::HeartRateService, Some(GattId::HeartRateMeasurement)) => {
                Ok(FakeCharacteristic { uuid })
            }
            _ => Err(TransportError::MissingCharacteristic { uuid }),
        }
    }

    #[instrument(skip(self, _device), level = "debug", fields(uuid = %characteristic.uuid))]
    async fn subscribe(
        &self,
        _device: &FakeDevice,
        characteristic: &FakeCharacteristic,
    ) -> Result<NotificationStream, TransportError> {
        pause(self.inner.subscribe_delay).await;
        self.check(FailurePoint::Subscribe)?;

        let (tx, rx) = mpsc::channel(16);
        let payloads = self.inner.notifications.clone();
        let interval = self.inner.notification_interval;
        tokio::spawn(async move {
            for payload in payloads {
                pause(interval).await;
                if tx.send(TransportEvent::Notification(payload)).await.is_err() {
                    return;
                }
            }
        });

        let notifications = ReceiverStream::new(rx);
        let stream: NotificationStream = match self.inner.link_end {
            LinkEnd::PeerDisconnect => Box::pin(
                notifications.chain(tokio_stream::once(TransportEvent::Disconnected)),
            ),
            LinkEnd::StayConnected => Box::pin(notifications.chain(tokio_stream::pending())),
        };
        Ok(stream)
    }

    async fn disconnect(&self, device: &FakeDevice) -> Result<(), TransportError> {
        debug!(device_id = device.identity.device_id(), "fake disconnect");
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<FixtureDevice>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<FixtureDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [adapter, device_id, local_name, rssi, services] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if [adapter, device_id, local_name, rssi, services]
        .iter()
        .any(|field| field.is_empty())
    {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = (*local_name != "-").then(|| local_name.to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };
    let advertised_services = if *services == "-" {
        Vec::new()
    } else {
        services
            .split('+')
            .map(parse_service_id)
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(FixtureDevice {
        identity: DeviceIdentity::new(
            adapter.to_string(),
            device_id.to_string(),
            local_name,
            rssi,
        ),
        advertised_services,
    })
}

fn parse_service_id(raw_value: &str) -> Result<Uuid, FixtureError> {
    u16::from_str_radix(raw_value, 16)
        .map(uuid_from_u16)
        .map_err(|_| FixtureError::InvalidServiceId {
            value: raw_value.to_string(),
        })
}

fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value.split(',').map(parse_hex).collect()
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|source| FixtureError::InvalidHex {
        value: cleaned,
        source,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("hci0|AA:BB|Polar H10|-43|180d", 1)]
    #[case("hci0|AA:BB|Polar H10|-43|180d;hci1|CC:DD|Speaker|-55|-", 2)]
    fn parse_scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let devices = parse_scan_fixture(fixture).expect("fixture should parse");
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn parse_scan_record_reads_optional_fields_and_services() {
        let device = parse_scan_record("hci0|AA:BB|-|-|180d+180f").expect("record should parse");

        assert_eq!(None, device.identity.local_name());
        assert_eq!(None, device.identity.rssi());
        assert_eq!(
            vec![
                protocol::gatt_metadata(GattId::HeartRateService).uuid(),
                uuid_from_u16(0x180F),
            ],
            device.advertised_services
        );
    }

    #[rstest]
    #[case::too_few("hci0|AA:BB|Polar H10|-43")]
    #[case::too_many("hci0|AA:BB|Polar H10|-43|180d|extra")]
    fn parse_scan_fixture_rejects_invalid_field_count(#[case] fixture: &str) {
        let result = parse_scan_fixture(fixture);
        assert_matches!(result, Err(FixtureError::InvalidRecordFieldCount));
    }

    #[test]
    fn parse_scan_fixture_rejects_bad_service_id() {
        let result = parse_scan_fixture("hci0|AA:BB|Polar H10|-43|heart");
        assert_matches!(result, Err(FixtureError::InvalidServiceId { value }) if value == "heart");
    }

    #[test]
    fn parse_hex_rejects_odd_length() {
        let result = parse_hex("A");
        assert_matches!(result, Err(FixtureError::InvalidHex { .. }));
    }

    #[test]
    fn parse_notifications_splits_on_commas() {
        let payloads = parse_notifications("0048, 16 48 00").expect("payloads should parse");
        assert_eq!(vec![vec![0x00, 0x48], vec![0x16, 0x48, 0x00]], payloads);
    }
}
