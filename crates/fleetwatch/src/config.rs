//! CLI configuration: thin wrapper around `fleetwatch_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--url, --api-key, --insecure, --timeout).

use secrecy::SecretString;

use fleetwatch_core::{BackendConfig, SyncConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use fleetwatch_config::{Config, Profile, config_path, load_config_or_default, save_config};

/// Everything a data command needs to talk to the backend.
#[derive(Debug)]
pub struct Resolved {
    pub backend: BackendConfig,
    pub sync: SyncConfig,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Build backend and sync config from the config file, the active
/// profile, and CLI overrides.
///
/// Without a matching profile, `--url` plus `--api-key` are enough.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: cfg.available_profiles(),
            });
        }
        None => {
            let url = global.url.clone().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            let mut profile = Profile::new(url);
            profile.timeout = Some(cfg.defaults.timeout);
            profile
        }
    };

    // Flag overrides
    if let Some(ref url) = global.url {
        profile.url.clone_from(url);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let api_key = resolve_api_key_with_flag(&profile, &profile_name, global)?;
    Ok(Resolved {
        backend: fleetwatch_config::backend_config(&profile, api_key)?,
        sync: fleetwatch_config::profile_to_sync_config(&profile)?,
    })
}

/// Resolve API key with CLI flag override, then fall through to shared resolution.
fn resolve_api_key_with_flag(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<SecretString, CliError> {
    if let Some(ref key) = global.api_key {
        return Ok(SecretString::from(key.clone()));
    }
    Ok(fleetwatch_config::resolve_api_key(profile, profile_name)?)
}
