// fleetwatch-core: Live view-model layer between fleetwatch-api and consumers (CLI).

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod liveness;
pub mod model;
pub mod projection;
pub mod sync;
pub mod view;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{
    Backend, ChangeFeed, ChangeFilter, ChangeKind, ChangeNotice, RecordSet, SupabaseBackend,
    Subscription, SubscriptionId, TelemetryStore,
};
pub use config::{BackendConfig, RefetchPolicy, SyncConfig, TlsVerification};
pub use error::CoreError;
pub use liveness::{Liveness, ONLINE_WINDOW, classify};
pub use projection::{DEFAULT_PAGE_SIZE, Page, map_center, paginate};
pub use sync::{
    Clock, QueryScope, ScreenState, ScreenView, SyncController, SyncPhase, SystemClock,
    load_detail, load_fleet,
};
pub use view::{DetailView, FleetSummary, FleetView, build};

pub use model::{
    Device, DeviceId, DeviceKey, EnrichedDevice, LatLng, LinkTemplate, MARKER_LINK_TEXT,
    MapMarker, TelemetrySample, add_device_link,
};
