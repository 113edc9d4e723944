// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DeviceId, DeviceKey};
use super::marker::LatLng;

/// A registered sensor device. Created outside this system; treated as
/// immutable here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub key: DeviceKey,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn position(&self) -> LatLng {
        LatLng {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

/// A device plus the state derived from its newest telemetry sample.
///
/// Rebuilt on every sync cycle; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDevice {
    #[serde(flatten)]
    pub device: Device,
    pub is_online: bool,
    /// `created_at` of the newest sample, if the device ever reported.
    pub last_seen: Option<DateTime<Utc>>,
}
