// ── Map marker and navigation types ──

use serde::{Deserialize, Serialize};

use super::device::EnrichedDevice;
use super::ids::DeviceId;

/// Call-to-action text on every marker popup.
pub const MARKER_LINK_TEXT: &str = "Learn more";

const ID_PLACEHOLDER: &str = "{id}";
const ADD_DEVICE_LINK: &str = "/dashboard/devices/add";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Map projection of one enriched device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub position: LatLng,
    pub title: String,
    pub link: String,
    pub link_text: String,
}

impl MapMarker {
    pub fn for_device(device: &EnrichedDevice, links: &LinkTemplate) -> Self {
        Self {
            position: device.device.position(),
            title: device.device.name.clone(),
            link: links.render(&device.device.id),
            link_text: MARKER_LINK_TEXT.into(),
        }
    }
}

/// Route pattern for device links, with an `{id}` placeholder.
///
/// Screens disagree on the detail route: the fleet map links to
/// `/devices/{id}` while the list and detail screens use
/// `/dashboard/devices/{id}`. The template is chosen per screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkTemplate(String);

impl LinkTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// `/devices/{id}`
    pub fn fleet() -> Self {
        Self::new("/devices/{id}")
    }

    /// `/dashboard/devices/{id}`
    pub fn dashboard() -> Self {
        Self::new("/dashboard/devices/{id}")
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }

    pub fn render(&self, id: &DeviceId) -> String {
        self.0.replace(ID_PLACEHOLDER, &id.to_string())
    }
}

impl Default for LinkTemplate {
    fn default() -> Self {
        Self::dashboard()
    }
}

/// Route of the "add device" screen.
pub fn add_device_link() -> &'static str {
    ADD_DEVICE_LINK
}
