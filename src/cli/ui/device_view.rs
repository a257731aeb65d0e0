use std::fmt::{self, Display, Formatter};

use crate::hw::DeviceIdentity;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

/// Renders a `DeviceIdentity` as a key-value table.
pub(crate) struct DeviceView<'a> {
    device: &'a DeviceIdentity,
    painter: &'a Painter,
}

impl<'a> DeviceView<'a> {
    pub(crate) fn new(device: &'a DeviceIdentity, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for DeviceView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = self.device.local_name().unwrap_or("<unknown>");
        let table = Table::key_value(
            self.painter,
            vec![
                ("adapter", self.painter.value(self.device.adapter_name())),
                ("device_id", self.painter.value(self.device.device_id())),
                ("name", self.painter.value(name)),
                ("rssi", self.painter.value(format_rssi(self.device.rssi()))),
            ],
        );
        write!(f, "{table}")
    }
}
