// ── Fetch cycles ──
//
// One cycle = fetch the rows a scope needs, then build its view. The
// controller runs cycles under subscriptions; `load_fleet` and
// `load_detail` run a single cycle without any.

use chrono::{DateTime, Utc};

use crate::backend::TelemetryStore;
use crate::error::CoreError;
use crate::liveness::Liveness;
use crate::model::{Device, DeviceId, DeviceKey, LinkTemplate, TelemetrySample};
use crate::view::{DetailView, FleetView};

use super::{Clock, QueryScope, ScreenState, ScreenView};

/// Raw rows of one completed fetch, not yet built into a view.
pub(crate) enum Fetched {
    Fleet {
        devices: Vec<Device>,
        samples: Vec<TelemetrySample>,
    },
    Detail {
        device: Device,
        latest: Option<TelemetrySample>,
    },
    NotFound(DeviceId),
}

impl Fetched {
    /// Telemetry key revealed by a detail fetch.
    pub(crate) fn device_key(&self) -> Option<&DeviceKey> {
        match self {
            Self::Detail { device, .. } => Some(&device.key),
            Self::Fleet { .. } | Self::NotFound(_) => None,
        }
    }
}

pub(crate) async fn fetch<B: TelemetryStore>(backend: &B, scope: &QueryScope) -> Result<Fetched, CoreError> {
    match scope {
        QueryScope::Fleet { .. } => {
            let (devices, samples) = tokio::try_join!(backend.list_devices(), backend.list_telemetry())?;
            Ok(Fetched::Fleet { devices, samples })
        }
        QueryScope::Device { id, .. } => {
            // the key is only known once the device row is in hand
            let Some(device) = backend.get_device(id).await? else {
                return Ok(Fetched::NotFound(id.clone()));
            };
            let latest = backend.latest_telemetry(&device.key).await?;
            Ok(Fetched::Detail { device, latest })
        }
    }
}

pub(crate) fn into_state(
    fetched: Fetched,
    links: &LinkTemplate,
    liveness: Liveness,
    now: DateTime<Utc>,
) -> ScreenState {
    let view = match fetched {
        Fetched::Fleet { devices, samples } => {
            ScreenView::Fleet(FleetView::build(liveness, &devices, &samples, now, links))
        }
        Fetched::Detail { device, latest } => {
            ScreenView::Detail(DetailView::build(liveness, &device, latest, now, links))
        }
        Fetched::NotFound(id) => return ScreenState::NotFound { id },
    };
    ScreenState::Ready(std::sync::Arc::new(view))
}

// ── One-shot loads ───────────────────────────────────────────────────

/// Fetch and build the fleet view once.
pub async fn load_fleet<B: TelemetryStore>(
    backend: &B,
    links: &LinkTemplate,
    liveness: Liveness,
    clock: &impl Clock,
) -> Result<FleetView, CoreError> {
    let (devices, samples) = tokio::try_join!(backend.list_devices(), backend.list_telemetry())?;
    Ok(FleetView::build(liveness, &devices, &samples, clock.now(), links))
}

/// Fetch and build one device's detail view once. `Ok(None)` if no
/// device has this id.
pub async fn load_detail<B: TelemetryStore>(
    backend: &B,
    id: &DeviceId,
    links: &LinkTemplate,
    liveness: Liveness,
    clock: &impl Clock,
) -> Result<Option<DetailView>, CoreError> {
    let Some(device) = backend.get_device(id).await? else {
        return Ok(None);
    };
    let latest = backend.latest_telemetry(&device.key).await?;
    Ok(Some(DetailView::build(liveness, &device, latest, clock.now(), links)))
}
