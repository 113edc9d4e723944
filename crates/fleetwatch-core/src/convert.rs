// ── API-to-domain type conversions ──
//
// Bridges raw `fleetwatch_api` row types into the domain model.

use fleetwatch_api::realtime::ChangeType;
use fleetwatch_api::{DeviceRow, RowId, TelemetryRow};

use crate::backend::ChangeKind;
use crate::model::{Device, DeviceId, DeviceKey, TelemetrySample};

impl From<RowId> for DeviceId {
    fn from(id: RowId) -> Self {
        match id {
            RowId::Int(n) => Self::Numeric(n),
            RowId::Text(s) => Self::Text(s),
        }
    }
}

impl From<&DeviceId> for RowId {
    fn from(id: &DeviceId) -> Self {
        match id {
            DeviceId::Numeric(n) => Self::Int(*n),
            DeviceId::Text(s) => Self::Text(s.clone()),
        }
    }
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Self {
            id: row.id.into(),
            key: DeviceKey::new(row.key),
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            created_at: row.created_at,
        }
    }
}

impl From<TelemetryRow> for TelemetrySample {
    fn from(row: TelemetryRow) -> Self {
        Self {
            device_key: DeviceKey::new(row.device_key),
            created_at: row.created_at,
            humidity: row.humidity,
            temperature: row.temperature,
            smoke_level: row.smoke_level,
            smoke_status: row.smoke_status,
        }
    }
}

impl From<ChangeType> for ChangeKind {
    fn from(t: ChangeType) -> Self {
        match t {
            ChangeType::Insert => Self::Insert,
            ChangeType::Update => Self::Update,
            ChangeType::Delete => Self::Delete,
            ChangeType::Unknown => Self::Other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_row_converts_ids_and_key() {
        let row: DeviceRow = serde_json::from_value(json!({
            "id": 12,
            "key": "a1b2",
            "name": "Dock 3",
            "latitude": 51.5,
            "longitude": -0.1
        }))
        .unwrap();

        let device = Device::from(row);
        assert_eq!(device.id, DeviceId::Numeric(12));
        assert_eq!(device.key.as_str(), "a1b2");
        assert!(device.created_at.is_none());
    }

    #[test]
    fn device_id_round_trips_to_row_id() {
        let id = DeviceId::Text("abc".into());
        assert_eq!(RowId::from(&id), RowId::Text("abc".into()));
    }
}
