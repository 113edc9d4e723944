//! Profile configuration for fleetwatch.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `fleetwatch_core::{BackendConfig, SyncConfig}`.
//! The CLI layers its flag overrides on top of these helpers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetwatch_core::{BackendConfig, RefetchPolicy, SyncConfig, TlsVerification};

/// Keyring service name under which API keys are stored.
pub const KEYRING_SERVICE: &str = "fleetwatch";

/// Prefix for environment overrides of the config file.
pub const ENV_PREFIX: &str = "FLEETWATCH_";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pick the profile name: explicit choice, then `default_profile`,
    /// then `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.available_profiles(),
            })
    }

    /// Comma-separated profile names, or `(none)`.
    pub fn available_profiles(&self) -> String {
        if self.profiles.is_empty() {
            "(none)".into()
        } else {
            self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// A named backend profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Project URL (e.g., "https://abc.supabase.co").
    pub url: String,

    /// Postgres schema exposed by the REST interface.
    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_devices_table")]
    pub devices_table: String,

    #[serde(default = "default_telemetry_table")]
    pub telemetry_table: String,

    /// API key (plaintext, prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification.
    pub insecure: Option<bool>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,

    /// Maximum sample age (seconds) for a device to count as online.
    pub liveness_window_secs: Option<u64>,

    #[serde(default)]
    pub refetch: RefetchPolicy,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema: default_schema(),
            devices_table: default_devices_table(),
            telemetry_table: default_telemetry_table(),
            api_key: None,
            api_key_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            liveness_window_secs: None,
            refetch: RefetchPolicy::default(),
        }
    }

    /// Check the URL and table names, returning the parsed project URL.
    pub fn validate(&self) -> Result<url::Url, ConfigError> {
        let url: url::Url = self.url.parse().map_err(|_| ConfigError::Validation {
            field: "url".into(),
            reason: format!("invalid URL: {}", self.url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "url".into(),
                reason: format!("expected an http(s) URL, got '{}'", url.scheme()),
            });
        }

        for (field, value) in [
            ("schema", &self.schema),
            ("devices_table", &self.devices_table),
            ("telemetry_table", &self.telemetry_table),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation {
                    field: field.into(),
                    reason: "cannot be empty".into(),
                });
            }
        }
        Ok(url)
    }
}

fn default_schema() -> String {
    "public".into()
}
fn default_devices_table() -> String {
    "devices".into()
}
fn default_telemetry_table() -> String {
    "device_statistics".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "fleetwatch", "fleetwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fleetwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path, still layering `FLEETWATCH_*` env.
///
/// A missing file is not an error; defaults fill the gap.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file is missing or broken.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/api-key")
}

/// Resolve an API key from the credential chain (no CLI flag step).
///
/// Order: `api_key_env` variable, system keyring, plaintext `api_key`.
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_api_key_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        |user| {
            keyring::Entry::new(KEYRING_SERVICE, user)
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_api_key_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(val) = profile.api_key_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if let Some(secret) = keyring(&keyring_user(profile_name)) {
        return Ok(SecretString::from(secret));
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store an API key for `profile_name` in the system keyring.
pub fn store_api_key(profile_name: &str, secret: &str) -> Result<(), ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::Validation {
            field: "api_key".into(),
            reason: "API key cannot be empty".into(),
        });
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))?;
    entry.set_password(secret)?;
    Ok(())
}

// ── Translation to runtime config ───────────────────────────────────

/// Build a `BackendConfig` from a profile and an already-resolved key.
pub fn backend_config(profile: &Profile, api_key: SecretString) -> Result<BackendConfig, ConfigError> {
    let url = profile.validate()?;

    let tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = BackendConfig::new(url, api_key);
    config.schema.clone_from(&profile.schema);
    config.devices_table.clone_from(&profile.devices_table);
    config.telemetry_table.clone_from(&profile.telemetry_table);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));
    Ok(config)
}

/// Build the per-screen `SyncConfig` a profile asks for.
pub fn profile_to_sync_config(profile: &Profile) -> Result<SyncConfig, ConfigError> {
    let mut config = SyncConfig {
        refetch: profile.refetch,
        ..SyncConfig::default()
    };
    if let Some(secs) = profile.liveness_window_secs {
        if secs == 0 {
            return Err(ConfigError::Validation {
                field: "liveness_window_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        config.liveness_window = Duration::from_secs(secs);
    }
    Ok(config)
}
