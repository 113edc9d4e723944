// ── Telemetry domain types ──

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DeviceKey;

/// One sensor reading. Samples are append-only; only the newest per
/// device key matters to the view model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// References `Device::key`, not `Device::id`.
    pub device_key: DeviceKey,
    pub created_at: DateTime<Utc>,
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub smoke_level: Option<f64>,
    pub smoke_status: bool,
}

impl TelemetrySample {
    /// Age relative to `now`. Negative for samples stamped in the future.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.created_at)
    }
}
