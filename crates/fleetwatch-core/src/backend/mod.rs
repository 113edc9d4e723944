// ── Backend seams ──
//
// The sync controller consumes "current rows" and "change notices" and
// nothing else. `TelemetryStore` covers the reads, `ChangeFeed` the
// notifications; `SupabaseBackend` implements both over fleetwatch-api,
// tests substitute their own.

pub mod supabase;

use std::fmt;
use std::future::Future;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Device, DeviceId, DeviceKey, TelemetrySample};

pub use supabase::SupabaseBackend;

/// The two independently updated record sets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum RecordSet {
    Devices,
    Telemetry,
}

/// Row filter attached to a change subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    All,
    /// Device registry rows with this primary id.
    DeviceId(DeviceId),
    /// Telemetry rows for this device key.
    DeviceKey(DeviceKey),
}

impl ChangeFilter {
    /// PostgREST operator form (`id=eq.7`, `device_key=eq.a1b2`).
    pub fn to_postgrest(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::DeviceId(id) => Some(format!("id=eq.{id}")),
            Self::DeviceKey(key) => Some(format!("device_key=eq.{key}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Other,
}

/// "Something changed in this record set." Only ever logged; the
/// controller answers every notice with a full re-fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub record_set: RecordSet,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live change subscription: release it with [`ChangeFeed::unsubscribe`].
pub struct Subscription {
    pub id: SubscriptionId,
    pub changes: BoxStream<'static, ChangeNotice>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// Bulk and point reads over the device registry and telemetry.
pub trait TelemetryStore: Send + Sync + 'static {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, CoreError>> + Send;

    /// `Ok(None)` when no device has this id.
    fn get_device(
        &self,
        id: &DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, CoreError>> + Send;

    fn list_telemetry(&self) -> impl Future<Output = Result<Vec<TelemetrySample>, CoreError>> + Send;

    /// Newest sample for `key`, or `Ok(None)` if the device never reported.
    fn latest_telemetry(
        &self,
        key: &DeviceKey,
    ) -> impl Future<Output = Result<Option<TelemetrySample>, CoreError>> + Send;
}

/// Change notifications, one subscription per record set and filter.
pub trait ChangeFeed: Send + Sync + 'static {
    fn subscribe(
        &self,
        record_set: RecordSet,
        filter: ChangeFilter,
    ) -> impl Future<Output = Result<Subscription, CoreError>> + Send;

    fn unsubscribe(&self, id: SubscriptionId) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Everything a [`SyncController`](crate::sync::SyncController) needs.
pub trait Backend: TelemetryStore + ChangeFeed {}

impl<T: TelemetryStore + ChangeFeed> Backend for T {}
