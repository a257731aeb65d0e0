use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use super::model::DeviceIdentity;
use super::transport::{DeviceFilter, NotificationStream, Transport, TransportEvent};
use crate::error::TransportError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Transport backed by the host Bluetooth stack through `btleplug`.
#[derive(Debug)]
pub struct BtleplugTransport {
    manager: Manager,
}

impl BtleplugTransport {
    /// Creates the real BLE transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform Bluetooth manager cannot be created.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, TransportError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }
}

/// Chosen peripheral together with the adapter that found it.
#[derive(Debug, Clone)]
pub struct BtleplugDevice {
    adapter: Adapter,
    peripheral: Peripheral,
    identity: DeviceIdentity,
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Device = BtleplugDevice;
    type Service = Service;
    type Characteristic = Characteristic;

    /// Scans every adapter until the first peripheral matching `filter` appears.
    ///
    /// The scan is stopped when this future completes or is dropped.
    #[instrument(skip(self), level = "debug", fields(%filter))]
    async fn request_device(&self, filter: &DeviceFilter) -> Result<BtleplugDevice, TransportError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");

        let scan_filter = ScanFilter {
            services: vec![filter.service()],
        };
        let mut guard = ScanGuard::default();
        for handle in &adapters {
            handle.adapter.start_scan(scan_filter.clone()).await?;
            guard.adapters.push(handle.adapter.clone());
        }

        loop {
            for handle in &adapters {
                for peripheral in handle.adapter.peripherals().await? {
                    let Some(properties) = peripheral.properties().await? else {
                        continue;
                    };
                    if !filter.matches(&properties.services, properties.local_name.as_deref()) {
                        trace!(device_id = %peripheral.id(), "skipping non-matching peripheral");
                        continue;
                    }

                    let identity = identity_from_properties(
                        &handle.name,
                        peripheral.id().to_string(),
                        properties,
                    );
                    info!(device_id = identity.device_id(), "found matching peripheral");
                    guard.stop().await;
                    return Ok(BtleplugDevice {
                        adapter: handle.adapter.clone(),
                        peripheral,
                        identity,
                    });
                }
            }

            sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    fn device_identity(&self, device: &BtleplugDevice) -> DeviceIdentity {
        device.identity.clone()
    }

    #[instrument(skip(self, device), level = "debug", fields(device_id = device.identity.device_id()))]
    async fn connect_gatt(&self, device: &BtleplugDevice) -> Result<(), TransportError> {
        if !device.peripheral.is_connected().await? {
            device.peripheral.connect().await?;
        }
        device.peripheral.discover_services().await?;
        Ok(())
    }

    async fn get_service(
        &self,
        device: &BtleplugDevice,
        uuid: Uuid,
    ) -> Result<Service, TransportError> {
        device
            .peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == uuid)
            .ok_or(TransportError::MissingService { uuid })
    }

    async fn get_characteristic(
        &self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        find_notify_characteristic(service, uuid)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic { uuid })
    }

    #[instrument(skip_all, level = "debug", fields(uuid = %characteristic.uuid))]
    async fn subscribe(
        &self,
        device: &BtleplugDevice,
        characteristic: &Characteristic,
    ) -> Result<NotificationStream, TransportError> {
        let notifications = device.peripheral.notifications().await?;
        let central_events = device.adapter.events().await?;
        device.peripheral.subscribe(characteristic).await?;

        let expected_uuid = characteristic.uuid;
        let notifications = notifications
            .filter(move |notification| notification.uuid == expected_uuid)
            .map(|notification| TransportEvent::Notification(notification.value))
            .chain(tokio_stream::once(TransportEvent::Disconnected));

        let peripheral_id = device.peripheral.id();
        let disconnects = central_events.filter_map(move |event| match event {
            CentralEvent::DeviceDisconnected(id) if id == peripheral_id => {
                Some(TransportEvent::Disconnected)
            }
            _ => None,
        });

        Ok(Box::pin(notifications.merge(disconnects)))
    }

    #[instrument(skip(self, device), level = "debug", fields(device_id = device.identity.device_id()))]
    async fn disconnect(&self, device: &BtleplugDevice) -> Result<(), TransportError> {
        if device.peripheral.is_connected().await? {
            device.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

/// Stops scanning on every adapter it holds, including when discovery is
/// cancelled by dropping the scan future.
#[derive(Default)]
struct ScanGuard {
    adapters: Vec<Adapter>,
}

impl ScanGuard {
    async fn stop(&mut self) {
        for adapter in self.adapters.drain(..) {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if self.adapters.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available to stop an abandoned scan");
            return;
        };
        let mut pending = Self {
            adapters: std::mem::take(&mut self.adapters),
        };
        runtime.spawn(async move { pending.stop().await });
    }
}

fn identity_from_properties(
    adapter_name: &str,
    device_id: String,
    properties: PeripheralProperties,
) -> DeviceIdentity {
    DeviceIdentity::new(
        adapter_name.to_string(),
        device_id,
        properties.local_name,
        properties.rssi,
    )
}

fn find_notify_characteristic(service: &Service, uuid: Uuid) -> Option<&Characteristic> {
    service.characteristics.iter().find(|characteristic| {
        characteristic.uuid == uuid
            && characteristic
                .properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    })
}
