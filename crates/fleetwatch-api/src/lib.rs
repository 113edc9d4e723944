// fleetwatch-api: Async Rust client for a PostgREST + realtime telemetry backend

pub mod error;
pub mod realtime;
pub mod rest;
pub mod transport;

pub use error::Error;
pub use realtime::{
    ChangeEvent, ChangeType, Channel, PostgresChanges, RealtimeClient, RealtimeConfig,
    ReconnectConfig,
};
pub use rest::{DeviceRow, RestClient, RowId, TableNames, TelemetryRow};
pub use transport::{TlsMode, TransportConfig};
