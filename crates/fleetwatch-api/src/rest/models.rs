// ── PostgREST wire types ──
//
// Rows exactly as the backend returns them from `select=*`. The core
// crate converts these into its domain model; nothing here carries
// derived state.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Primary key of a row. Tables are created with either a `bigint`
/// identity or a `uuid` default, so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A row from the device registry table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRow {
    pub id: RowId,
    /// Correlation key referenced by telemetry rows (`device_key`).
    pub key: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A row from the telemetry table (`device_statistics` by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRow {
    #[serde(default)]
    pub id: Option<RowId>,
    pub device_key: String,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub smoke_level: Option<f64>,
    /// Stored as `boolean` or as a 0/1 `smallint` depending on schema version.
    #[serde(default, deserialize_with = "de_flag")]
    pub smoke_status: bool,
}

// ── Deserialization helpers ──────────────────────────────────────────

/// Parse a Postgres timestamp as rendered by PostgREST.
///
/// `timestamptz` columns carry an offset; plain `timestamp` columns do
/// not and are interpreted as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Postgres emits short offsets ("+00") which RFC 3339 rejects.
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
    }
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(serde_json::Value::String(s)) => matches!(s.as_str(), "true" | "1" | "t"),
        _ => false,
    })
}
