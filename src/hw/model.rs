use serde::Serialize;
use strum_macros::Display;

/// Identity of the peripheral a session is bound to.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceIdentity {
    adapter_name: String,
    device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<i16>,
}

impl DeviceIdentity {
    /// Creates a new device identity record.
    pub(crate) fn new(
        adapter_name: String,
        device_id: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name,
            device_id,
            local_name,
            rssi,
        }
    }

    /// Returns the adapter name used to discover this device.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }
}

/// Lifecycle state of the single device session.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display)]
pub enum ConnectionState {
    #[default]
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "discovering")]
    Discovering,
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "subscribing")]
    Subscribing,
    #[strum(to_string = "active")]
    Active,
    #[strum(to_string = "disconnecting")]
    Disconnecting,
}

impl ConnectionState {
    /// Returns whether no session is in progress.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Reason why a listen run stopped.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenStopReason {
    /// Stopped after receiving the requested number of readings.
    #[display("reached reading limit ({_0})")]
    ReachedLimit(usize),
    /// Stopped by Ctrl+C.
    #[display("interrupted by user")]
    Interrupted,
    /// The peripheral dropped the connection.
    #[display("device disconnected")]
    PeerDisconnected,
}

/// Summary returned after a listen run completes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ListenSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<DeviceIdentity>,
    received_readings: usize,
    rejected_notifications: usize,
    stop_reason: ListenStopReason,
}

impl ListenSummary {
    pub(crate) fn new(
        device: Option<DeviceIdentity>,
        received_readings: usize,
        rejected_notifications: usize,
        stop_reason: ListenStopReason,
    ) -> Self {
        Self {
            device,
            received_readings,
            rejected_notifications,
            stop_reason,
        }
    }

    /// Returns the device the run was connected to, if a connection was made.
    #[must_use]
    pub fn device(&self) -> Option<&DeviceIdentity> {
        self.device.as_ref()
    }

    /// Returns the number of decoded readings.
    #[must_use]
    pub fn received_readings(&self) -> usize {
        self.received_readings
    }

    /// Returns the number of notifications that failed to decode.
    #[must_use]
    pub fn rejected_notifications(&self) -> usize {
        self.rejected_notifications
    }

    /// Returns why the run stopped.
    #[must_use]
    pub fn stop_reason(&self) -> &ListenStopReason {
        &self.stop_reason
    }
}
