//! Shared helpers for command handlers.

use fleetwatch_core::{
    DeviceId, FleetView, LinkTemplate, Liveness, SupabaseBackend, SystemClock, load_fleet,
};

use crate::config::Resolved;
use crate::error::CliError;

/// Read-only backend for one-shot commands.
pub fn backend(resolved: &Resolved) -> Result<SupabaseBackend, CliError> {
    Ok(SupabaseBackend::rest_only(&resolved.backend)?)
}

pub fn liveness(resolved: &Resolved) -> Liveness {
    Liveness::new(resolved.sync.liveness_window)
}

/// Fetch devices and telemetry once and build the fleet view.
pub async fn fetch_fleet(resolved: &Resolved, links: &LinkTemplate) -> Result<FleetView, CliError> {
    let backend = backend(resolved)?;
    Ok(load_fleet(&backend, links, liveness(resolved), &SystemClock).await?)
}

/// Device ids are numeric when they parse as integers, text otherwise.
pub fn parse_device_id(raw: &str) -> DeviceId {
    DeviceId::from(raw.trim())
}

/// `-` for absent optional readings.
pub fn reading(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.1}{unit}"))
}
