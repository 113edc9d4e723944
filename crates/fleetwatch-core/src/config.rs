// ── Runtime backend and sync configuration ──
//
// These types describe *where* the backend lives and *how* screens keep
// in sync with it. They carry credentials but never touch disk; the CLI
// builds them from its profile and hands them in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::liveness::ONLINE_WINDOW;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Connection settings for one backend project.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project URL (e.g. `https://abc.supabase.co`).
    pub url: Url,
    pub api_key: SecretString,
    pub schema: String,
    pub devices_table: String,
    pub telemetry_table: String,
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(url: Url, api_key: SecretString) -> Self {
        Self {
            url,
            api_key,
            schema: "public".into(),
            devices_table: "devices".into(),
            telemetry_table: "device_statistics".into(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// What to do with change notifications that arrive while a cycle is
/// already in flight.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RefetchPolicy {
    /// Every notification starts its own cycle.
    #[default]
    Independent,
    /// At most one cycle in flight; notifications during it collapse
    /// into a single follow-up cycle.
    Coalesce,
}

/// Per-screen synchronization tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum sample age for a device to count as online.
    pub liveness_window: Duration,
    pub refetch: RefetchPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            liveness_window: ONLINE_WINDOW,
            refetch: RefetchPolicy::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn refetch_policy_parses_lowercase() {
        assert_eq!("coalesce".parse::<RefetchPolicy>().unwrap(), RefetchPolicy::Coalesce);
        assert_eq!(RefetchPolicy::Independent.to_string(), "independent");
    }

    #[test]
    fn backend_defaults_match_dashboard_tables() {
        let config = BackendConfig::new(
            Url::parse("https://abc.example.co").unwrap(),
            SecretString::from("k".to_string()),
        );
        assert_eq!(config.devices_table, "devices");
        assert_eq!(config.telemetry_table, "device_statistics");
        assert_eq!(config.tls, TlsVerification::SystemDefaults);
    }
}
