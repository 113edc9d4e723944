//! Config subcommand handlers.

use std::io::BufRead;

use fleetwatch_core::RefetchPolicy;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

const SETTABLE_KEYS: &str = "url, schema, devices_table, telemetry_table, api_key, api_key_env, \
     ca_cert, insecure, timeout, liveness_window_secs, refetch";

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with plaintext secrets masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.api_key.is_some() {
            profile.api_key = Some("****".into());
        }
    }
    cfg
}

/// Format config for display. Expects an already-redacted config.
fn format_config(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "url = \"{}\"", p.url);
        let _ = writeln!(out, "schema = \"{}\"", p.schema);
        let _ = writeln!(out, "devices_table = \"{}\"", p.devices_table);
        let _ = writeln!(out, "telemetry_table = \"{}\"", p.telemetry_table);
        if let Some(ref key) = p.api_key {
            let _ = writeln!(out, "api_key = \"{key}\"");
        }
        if let Some(ref env) = p.api_key_env {
            let _ = writeln!(out, "api_key_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(window) = p.liveness_window_secs {
            let _ = writeln!(out, "liveness_window_secs = {window}");
        }
        let _ = writeln!(out, "refetch = \"{}\"", p.refetch);
    }

    out.trim_end().to_owned()
}

fn save_config(cfg: &Config) -> Result<std::path::PathBuf, CliError> {
    Ok(config::save_config(cfg)?)
}

fn invalid(field: &str, reason: impl Into<String>) -> CliError {
    CliError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

fn parse_number(field: &str, value: &str) -> Result<u64, CliError> {
    value
        .parse()
        .map_err(|_| invalid(field, "must be a whole number of seconds"))
}

/// Apply one `config set` assignment to a profile.
fn apply_setting(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key {
        "url" => profile.url = value,
        "schema" => profile.schema = value,
        "devices_table" | "devices-table" => profile.devices_table = value,
        "telemetry_table" | "telemetry-table" => profile.telemetry_table = value,
        "api_key" | "api-key" => profile.api_key = Some(value),
        "api_key_env" | "api-key-env" => profile.api_key_env = Some(value),
        "ca_cert" | "ca-cert" => profile.ca_cert = Some(value.into()),
        "insecure" => {
            profile.insecure = Some(
                value
                    .parse()
                    .map_err(|_| invalid("insecure", "must be 'true' or 'false'"))?,
            );
        }
        "timeout" => profile.timeout = Some(parse_number("timeout", &value)?),
        "liveness_window_secs" | "liveness-window-secs" => {
            let secs = parse_number("liveness_window_secs", &value)?;
            if secs == 0 {
                return Err(invalid("liveness_window_secs", "must be greater than zero"));
            }
            profile.liveness_window_secs = Some(secs);
        }
        "refetch" => {
            profile.refetch = value
                .parse::<RefetchPolicy>()
                .map_err(|_| invalid("refetch", "must be 'independent' or 'coalesce'"))?;
        }
        other => {
            return Err(invalid(
                other,
                format!("unknown config key '{other}'. Valid keys: {SETTABLE_KEYS}"),
            ));
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init {
            project_url,
            api_key_env,
            keyring,
        } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);

            let mut profile = Profile::new(project_url);
            profile.api_key_env = api_key_env;
            profile.validate()?;

            match (global.api_key.as_deref(), keyring) {
                (Some(key), true) => {
                    fleetwatch_config::store_api_key(&profile_name, key)?;
                    eprintln!("✓ API key stored in system keyring");
                }
                (Some(key), false) => profile.api_key = Some(key.to_owned()),
                (None, true) => {
                    return Err(invalid("keyring", "--keyring needs an API key via --api-key"));
                }
                (None, false) => {}
            }

            cfg.profiles.insert(profile_name.clone(), profile);
            cfg.default_profile = Some(profile_name.clone());
            let path = save_config(&cfg)?;

            eprintln!("✓ Configuration written to {}", path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Test it: fleetwatch summary");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(global.output, &cfg, format_config, |_| {
                config::config_path().display().to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);

            let profile = cfg
                .profiles
                .entry(profile_name.clone())
                .or_insert_with(|| Profile::new(String::new()));
            apply_setting(profile, &key, value)?;

            save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: fleetwatch config init --project-url <URL>");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            cfg.profile(&name)?;

            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetKey ──────────────────────────────────────────────────
        ConfigCommand::SetKey => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            cfg.profile(&profile_name)?;

            eprintln!("Paste the API key for profile '{profile_name}' and press Enter:");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            fleetwatch_config::store_api_key(&profile_name, line.trim())?;

            eprintln!("✓ API key stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}
