// PostgREST read interface
//
// Row listing and point lookups for the device registry and the
// telemetry table. Query operators are pushed down to the server.

pub mod client;
pub mod devices;
pub mod models;
pub mod telemetry;

pub use client::{DEFAULT_PAGE_SIZE, RestClient, TableNames};
pub use models::{DeviceRow, RowId, TelemetryRow};
