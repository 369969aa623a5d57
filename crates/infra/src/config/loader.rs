//! Settings loader
//!
//! Loads [`ResilienceSettings`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Every loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! Required:
//! - `PROJECTHUB_CIRCUIT_FAILURE_THRESHOLD`
//! - `PROJECTHUB_RETRY_MAX_ATTEMPTS`
//!
//! Optional (defaults apply when unset):
//! - `PROJECTHUB_CIRCUIT_RECOVERY_TIMEOUT_MS`
//! - `PROJECTHUB_CIRCUIT_MONITORING_PERIOD_MS`
//! - `PROJECTHUB_CIRCUIT_HALF_OPEN_MAX_CALLS`
//! - `PROJECTHUB_RETRY_BASE_DELAY_MS`: base of the exponential backoff
//! - `PROJECTHUB_RETRY_ATTEMPT_TIMEOUT_MS`
//! - `PROJECTHUB_HEALTH_INTERVAL_MS`
//! - `PROJECTHUB_HEALTH_ENABLED`: true/false
//! - `PROJECTHUB_SWEEP_INTERVAL_MS`
//!
//! ## File Locations
//! The loader probes, in order, `config.{json,toml}` and
//! `projecthub.{json,toml}` in the current directory, its parent and
//! grandparent, then the same names next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use projecthub_common::resilience::BackoffStrategy;

use super::settings::ResilienceSettings;
use crate::errors::{InfraError, Result};

const CONFIG_FILE_NAMES: [&str; 4] =
    ["config.json", "config.toml", "projecthub.json", "projecthub.toml"];

/// Load settings, trying the environment first and then a config file
///
/// # Errors
/// Returns `InfraError::Config` if neither source yields valid settings.
pub fn load() -> Result<ResilienceSettings> {
    match load_from_env() {
        Ok(settings) => {
            tracing::info!("Resilience settings loaded from environment variables");
            Ok(settings)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Like [`load`], but fall back to built-in defaults when no source is
/// present. A source that is present but invalid is still an error.
pub fn load_or_default() -> Result<ResilienceSettings> {
    if std::env::var_os("PROJECTHUB_CIRCUIT_FAILURE_THRESHOLD").is_some()
        || std::env::var_os("PROJECTHUB_RETRY_MAX_ATTEMPTS").is_some()
    {
        return load_from_env();
    }

    match probe_config_paths() {
        Some(path) => load_from_file(Some(path)),
        None => {
            tracing::info!("No resilience configuration found, using defaults");
            Ok(ResilienceSettings::default())
        }
    }
}

/// Load settings from `PROJECTHUB_*` environment variables
///
/// # Errors
/// Returns `InfraError::Config` if a required variable is missing or any
/// variable has an invalid value.
pub fn load_from_env() -> Result<ResilienceSettings> {
    let mut settings = ResilienceSettings::default();

    settings.circuit.failure_threshold =
        parse_var("PROJECTHUB_CIRCUIT_FAILURE_THRESHOLD", &env_var("PROJECTHUB_CIRCUIT_FAILURE_THRESHOLD")?)?;
    settings.retry.max_attempts =
        parse_var("PROJECTHUB_RETRY_MAX_ATTEMPTS", &env_var("PROJECTHUB_RETRY_MAX_ATTEMPTS")?)?;

    if let Some(timeout) = env_millis("PROJECTHUB_CIRCUIT_RECOVERY_TIMEOUT_MS")? {
        settings.circuit.recovery_timeout = timeout;
    }
    if let Some(period) = env_millis("PROJECTHUB_CIRCUIT_MONITORING_PERIOD_MS")? {
        settings.circuit.monitoring_period = period;
    }
    if let Some(max_calls) = env_parse("PROJECTHUB_CIRCUIT_HALF_OPEN_MAX_CALLS")? {
        settings.circuit.half_open_max_calls = max_calls;
    }
    if let Some(base_delay) = env_millis("PROJECTHUB_RETRY_BASE_DELAY_MS")? {
        let max_delay = match settings.retry.backoff {
            BackoffStrategy::Exponential { max_delay, .. } => max_delay,
            BackoffStrategy::Fixed { .. } => None,
        };
        settings.retry.backoff = BackoffStrategy::Exponential { base_delay, max_delay };
    }
    if let Some(timeout) = env_millis("PROJECTHUB_RETRY_ATTEMPT_TIMEOUT_MS")? {
        settings.retry.attempt_timeout = timeout;
    }
    if let Some(interval) = env_millis("PROJECTHUB_HEALTH_INTERVAL_MS")? {
        settings.health.interval = interval;
    }
    settings.health.enabled = env_bool("PROJECTHUB_HEALTH_ENABLED", settings.health.enabled);
    if let Some(interval) = env_millis("PROJECTHUB_SWEEP_INTERVAL_MS")? {
        settings.sweep_interval = interval;
    }

    settings.validate()?;
    Ok(settings)
}

/// Load settings from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected by
/// extension (`.json` or `.toml`).
///
/// # Errors
/// Returns `InfraError::Config` if the file is missing, unreadable,
/// malformed or fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<ResilienceSettings> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(InfraError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            InfraError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading resilience settings from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| InfraError::Config(format!("Failed to read config file: {e}")))?;

    let settings = parse_settings(&contents, &config_path)?;
    settings.validate()?;
    Ok(settings)
}

fn parse_settings(contents: &str, path: &Path) -> Result<ResilienceSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| InfraError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| InfraError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(InfraError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations and return the first existing config file
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend([exe_dir.to_path_buf(), exe_dir.join(".."), exe_dir.join("../..")]);
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| InfraError::Config(format!("Missing required environment variable: {key}")))
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| InfraError::Config(format!("Invalid value for {key}: {e}")))
}

/// Parse an optional environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key).ok().map(|raw| parse_var(key, &raw)).transpose()
}

/// Parse an optional millisecond duration from the environment
fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
