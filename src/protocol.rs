use std::collections::HashMap;
use std::sync::LazyLock;

use btleplug::api::bleuuid::uuid_from_u16;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// GATT attributes of the Bluetooth SIG Heart Rate profile used by this crate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display)]
pub enum GattId {
    /// Heart Rate service.
    #[strum(to_string = "heart_rate")]
    HeartRateService,
    /// Heart Rate Measurement characteristic (notify only).
    #[strum(to_string = "heart_rate_measurement")]
    HeartRateMeasurement,
}

/// Attribute category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum GattKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one GATT attribute.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct GattMetadata {
    name: &'static str,
    assigned_number: u16,
    kind: GattKind,
}

impl GattMetadata {
    /// Human-readable attribute name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// 16-bit SIG assigned number.
    pub(crate) fn assigned_number(self) -> u16 {
        self.assigned_number
    }

    /// Full 128-bit UUID on the Bluetooth base UUID.
    pub(crate) fn uuid(self) -> Uuid {
        uuid_from_u16(self.assigned_number)
    }

    pub(crate) fn kind(self) -> GattKind {
        self.kind
    }
}

static ID_BY_UUID: LazyLock<HashMap<Uuid, GattId>> = LazyLock::new(|| {
    GattId::iter()
        .map(|id| (gatt_metadata(id).uuid(), id))
        .collect()
});

/// Returns metadata for one attribute.
pub(crate) fn gatt_metadata(id: GattId) -> GattMetadata {
    match id {
        GattId::HeartRateService => GattMetadata {
            name: "Heart Rate",
            assigned_number: 0x180D,
            kind: GattKind::Service,
        },
        GattId::HeartRateMeasurement => GattMetadata {
            name: "Heart Rate Measurement",
            assigned_number: 0x2A37,
            kind: GattKind::Characteristic,
        },
    }
}

/// Resolves a UUID back to a known attribute.
pub(crate) fn gatt_id_for_uuid(uuid: Uuid) -> Option<GattId> {
    ID_BY_UUID.get(&uuid).copied()
}
