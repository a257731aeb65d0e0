use std::fmt::{self, Display, Formatter};
use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;
use uuid::Uuid;

use super::model::DeviceIdentity;
use crate::error::TransportError;
use crate::protocol;

/// One item delivered on a subscribed characteristic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportEvent {
    /// A characteristic value pushed by the peripheral.
    Notification(Vec<u8>),
    /// The platform reported that the link to the peripheral is gone.
    Disconnected,
}

/// Push-based stream of notifications and link events for one subscription.
///
/// The stream ending is treated the same as [`TransportEvent::Disconnected`].
pub type NotificationStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Discovery filter: only peripherals advertising `service` are offered.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceFilter {
    service: Uuid,
    name_prefix: Option<String>,
}

impl DeviceFilter {
    pub(crate) fn new(service: Uuid, name_prefix: Option<String>) -> Self {
        Self {
            service,
            name_prefix,
        }
    }

    /// Returns the service UUID a device must advertise.
    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    /// Returns the optional local-name prefix narrowing the match.
    #[must_use]
    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    /// Returns whether an advertisement satisfies this filter.
    pub(crate) fn matches(&self, advertised_services: &[Uuid], local_name: Option<&str>) -> bool {
        if !advertised_services.contains(&self.service) {
            return false;
        }

        match self.name_prefix.as_deref() {
            Some(prefix) => local_name.is_some_and(|name| name.starts_with(prefix)),
            None => true,
        }
    }
}

impl Display for DeviceFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match protocol::gatt_id_for_uuid(self.service) {
            Some(id) => write!(f, "the {id} service")?,
            None => write!(f, "service {}", self.service)?,
        }
        if let Some(prefix) = &self.name_prefix {
            write!(f, " named `{prefix}*`")?;
        }
        Ok(())
    }
}

/// Host platform Bluetooth transport consumed by the session controller.
///
/// Each operation is one suspension point of the connect sequence; the
/// controller awaits exactly one of them at a time and may drop a pending
/// future when the session is stopped.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Platform handle to a chosen peripheral.
    type Device: Clone + Send + Sync + 'static;
    /// A resolved primary service on a connected peripheral.
    type Service: Send + Sync + 'static;
    /// A resolved characteristic on a service.
    type Characteristic: Send + Sync + 'static;

    /// Waits for a peripheral matching `filter` and returns its handle.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Self::Device, TransportError>;

    /// Returns the identity reported to the UI for a device handle.
    fn device_identity(&self, device: &Self::Device) -> DeviceIdentity;

    /// Connects to the peripheral's GATT server.
    async fn connect_gatt(&self, device: &Self::Device) -> Result<(), TransportError>;

    /// Looks up one primary service on a connected peripheral.
    async fn get_service(
        &self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> Result<Self::Service, TransportError>;

    /// Looks up one characteristic on a resolved service.
    async fn get_characteristic(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Self::Characteristic, TransportError>;

    /// Enables notifications and returns the stream delivering them.
    async fn subscribe(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
    ) -> Result<NotificationStream, TransportError>;

    /// Tears down the link to the peripheral.
    async fn disconnect(&self, device: &Self::Device) -> Result<(), TransportError>;
}
