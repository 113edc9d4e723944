// ── Domain model ──

pub mod device;
pub mod ids;
pub mod marker;
pub mod telemetry;

pub use device::{Device, EnrichedDevice};
pub use ids::{DeviceId, DeviceKey};
pub use marker::{LatLng, LinkTemplate, MARKER_LINK_TEXT, MapMarker, add_device_link};
pub use telemetry::TelemetrySample;
