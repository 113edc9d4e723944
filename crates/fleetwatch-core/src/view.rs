// ── View model builder ──
//
// Joins device rows with the newest telemetry sample per device key and
// classifies liveness. Output is rebuilt wholesale from a fetch; nothing
// is patched incrementally.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::liveness::Liveness;
use crate::model::{Device, DeviceId, DeviceKey, EnrichedDevice, LinkTemplate, MapMarker, TelemetrySample};

/// Build the enriched device list and its marker projection with the
/// default liveness window.
///
/// One entry per device, in input order, including devices that never
/// reported. Markers mirror the device list 1:1.
pub fn build(
    devices: &[Device],
    samples: &[TelemetrySample],
    now: DateTime<Utc>,
    links: &LinkTemplate,
) -> (Vec<EnrichedDevice>, Vec<MapMarker>) {
    build_with(Liveness::default(), devices, samples, now, links)
}

pub fn build_with(
    liveness: Liveness,
    devices: &[Device],
    samples: &[TelemetrySample],
    now: DateTime<Utc>,
    links: &LinkTemplate,
) -> (Vec<EnrichedDevice>, Vec<MapMarker>) {
    let latest = latest_by_key(samples);

    let enriched: Vec<EnrichedDevice> = devices
        .iter()
        .map(|d| enrich(d, latest.get(&d.key).copied(), now, liveness))
        .collect();
    let markers = enriched
        .iter()
        .map(|d| MapMarker::for_device(d, links))
        .collect();

    (enriched, markers)
}

/// Newest sample per device key. On equal timestamps the sample seen
/// first wins.
pub fn latest_by_key(samples: &[TelemetrySample]) -> HashMap<&DeviceKey, &TelemetrySample> {
    let mut latest: HashMap<&DeviceKey, &TelemetrySample> = HashMap::new();
    for sample in samples {
        latest
            .entry(&sample.device_key)
            .and_modify(|current| {
                if sample.created_at > current.created_at {
                    *current = sample;
                }
            })
            .or_insert(sample);
    }
    latest
}

pub fn enrich(
    device: &Device,
    latest: Option<&TelemetrySample>,
    now: DateTime<Utc>,
    liveness: Liveness,
) -> EnrichedDevice {
    EnrichedDevice {
        device: device.clone(),
        is_online: liveness.classify_within(latest, now),
        last_seen: latest.map(|s| s.created_at),
    }
}

// ── Screen views ─────────────────────────────────────────────────────

/// Everything the fleet screens render: list, cards and map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetView {
    pub devices: Vec<EnrichedDevice>,
    pub markers: Vec<MapMarker>,
    pub built_at: DateTime<Utc>,
}

impl FleetView {
    pub fn build(
        liveness: Liveness,
        devices: &[Device],
        samples: &[TelemetrySample],
        now: DateTime<Utc>,
        links: &LinkTemplate,
    ) -> Self {
        let (devices, markers) = build_with(liveness, devices, samples, now, links);
        Self {
            devices,
            markers,
            built_at: now,
        }
    }

    pub fn summary(&self) -> FleetSummary {
        let online = self.devices.iter().filter(|d| d.is_online).count();
        FleetSummary {
            total: self.devices.len(),
            online,
            offline: self.devices.len() - online,
        }
    }

    pub fn find(&self, id: &DeviceId) -> Option<&EnrichedDevice> {
        self.devices.iter().find(|d| &d.device.id == id)
    }
}

/// One device with its newest reading, for the detail screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailView {
    pub device: EnrichedDevice,
    pub latest: Option<TelemetrySample>,
    pub marker: MapMarker,
    pub built_at: DateTime<Utc>,
}

impl DetailView {
    pub fn build(
        liveness: Liveness,
        device: &Device,
        latest: Option<TelemetrySample>,
        now: DateTime<Utc>,
        links: &LinkTemplate,
    ) -> Self {
        let enriched = enrich(device, latest.as_ref(), now, liveness);
        let marker = MapMarker::for_device(&enriched, links);
        Self {
            device: enriched,
            latest,
            marker,
            built_at: now,
        }
    }
}

/// Dashboard stat-card counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::MARKER_LINK_TEXT;
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap()
    }

    fn device(id: i64, key: &str) -> Device {
        Device {
            id: DeviceId::Numeric(id),
            key: DeviceKey::new(key),
            name: format!("Device {id}"),
            latitude: 1.0 + f64::from(u8::try_from(id).unwrap()),
            longitude: 2.0,
            created_at: None,
        }
    }

    fn sample(key: &str, age_secs: i64, temperature: f64) -> TelemetrySample {
        TelemetrySample {
            device_key: DeviceKey::new(key),
            created_at: now() - TimeDelta::seconds(age_secs),
            humidity: Some(50.0),
            temperature: Some(temperature),
            smoke_level: Some(0.0),
            smoke_status: false,
        }
    }

    #[test]
    fn device_without_samples_is_offline_with_marker() {
        let devices = vec![device(1, "k1")];
        let (enriched, markers) = build(&devices, &[], now(), &LinkTemplate::fleet());

        assert_eq!(enriched.len(), 1);
        assert!(!enriched[0].is_online);
        assert!(enriched[0].last_seen.is_none());
        assert_eq!(markers[0].title, "Device 1");
        assert_eq!(markers[0].link, "/devices/1");
        assert_eq!(markers[0].link_text, MARKER_LINK_TEXT);
    }

    #[test]
    fn newest_sample_decides_liveness() {
        let devices = vec![device(1, "k1")];
        let samples = vec![sample("k1", 600, 20.0), sample("k1", 120, 21.0)];
        let (enriched, _) = build(&devices, &samples, now(), &LinkTemplate::fleet());

        assert!(enriched[0].is_online);
        assert_eq!(enriched[0].last_seen, Some(now() - TimeDelta::seconds(120)));
    }

    #[test]
    fn sample_order_does_not_matter() {
        let devices = vec![device(1, "k1")];
        let samples = vec![sample("k1", 120, 21.0), sample("k1", 600, 20.0)];
        let (enriched, _) = build(&devices, &samples, now(), &LinkTemplate::fleet());
        assert!(enriched[0].is_online);
    }

    #[test]
    fn equal_timestamps_keep_first_in_fetch_order() {
        let samples = vec![sample("k1", 30, 20.0), sample("k1", 30, 99.0)];
        let latest = latest_by_key(&samples);
        assert_eq!(latest[&DeviceKey::new("k1")].temperature, Some(20.0));
    }

    #[test]
    fn samples_join_on_key_not_id() {
        // device 2's key matches nothing even though a sample key equals its id
        let devices = vec![device(1, "k1"), device(2, "k2")];
        let samples = vec![sample("2", 10, 20.0), sample("k1", 10, 20.0)];
        let (enriched, _) = build(&devices, &samples, now(), &LinkTemplate::fleet());
        assert!(enriched[0].is_online);
        assert!(!enriched[1].is_online);
    }

    #[test]
    fn output_preserves_device_order_and_count() {
        let devices: Vec<Device> = (1..=6).rev().map(|i| device(i, &format!("k{i}"))).collect();
        let samples = vec![sample("k3", 10, 20.0), sample("k9", 10, 20.0)];
        let (enriched, markers) = build(&devices, &samples, now(), &LinkTemplate::dashboard());

        assert_eq!(enriched.len(), devices.len());
        assert_eq!(markers.len(), devices.len());
        for ((e, m), d) in enriched.iter().zip(&markers).zip(&devices) {
            assert_eq!(e.device.id, d.id);
            assert_eq!(m.title, d.name);
            assert_eq!(m.position, d.position());
        }
    }

    #[test]
    fn build_is_idempotent() {
        let devices = vec![device(1, "k1"), device(2, "k2")];
        let samples = vec![sample("k1", 10, 20.0), sample("k2", 900, 20.0)];
        let first = build(&devices, &samples, now(), &LinkTemplate::fleet());
        let second = build(&devices, &samples, now(), &LinkTemplate::fleet());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_inputs() {
        let (enriched, markers) = build(&[], &[sample("k1", 1, 1.0)], now(), &LinkTemplate::fleet());
        assert!(enriched.is_empty());
        assert!(markers.is_empty());
    }

    #[test]
    fn summary_counts() {
        let devices = vec![device(1, "k1"), device(2, "k2"), device(3, "k3")];
        let samples = vec![sample("k1", 10, 20.0), sample("k3", 299, 20.0)];
        let view = FleetView::build(Liveness::default(), &devices, &samples, now(), &LinkTemplate::fleet());

        assert_eq!(
            view.summary(),
            FleetSummary {
                total: 3,
                online: 2,
                offline: 1
            }
        );
        assert!(view.find(&DeviceId::Numeric(2)).is_some_and(|d| !d.is_online));
    }

    #[test]
    fn detail_view_uses_dashboard_link() {
        let d = device(4, "k4");
        let view = DetailView::build(
            Liveness::default(),
            &d,
            Some(sample("k4", 5, 22.0)),
            now(),
            &LinkTemplate::dashboard(),
        );
        assert!(view.device.is_online);
        assert_eq!(view.marker.link, "/dashboard/devices/4");
        assert_eq!(view.latest.as_ref().and_then(|s| s.temperature), Some(22.0));
    }
}
