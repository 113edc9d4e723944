// ── Liveness classification ──
//
// A device is online iff its newest telemetry sample is at most
// `ONLINE_WINDOW` old. Pure: the caller supplies `now`.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::TelemetrySample;

/// Default maximum sample age for a device to count as online.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(300);

/// Online/offline classifier with a configurable window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub window: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            window: ONLINE_WINDOW,
        }
    }
}

impl Liveness {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// `true` iff a sample exists and `now - sample.created_at <= window`.
    ///
    /// The boundary is inclusive. Future-dated samples (clock skew) have a
    /// negative age and classify as online.
    pub fn classify_within(&self, sample: Option<&TelemetrySample>, now: DateTime<Utc>) -> bool {
        let window = TimeDelta::from_std(self.window).unwrap_or(TimeDelta::MAX);
        sample.is_some_and(|s| s.age(now) <= window)
    }
}

/// Classify with the default five-minute window.
pub fn classify(sample: Option<&TelemetrySample>, now: DateTime<Utc>) -> bool {
    Liveness::default().classify_within(sample, now)
}
