//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TransportSettings::default()`]
//! 2. If `configs/config_{APP_ENV}.json` (or an explicit path) exists,
//!    deep-merge its values over defaults
//! 3. Apply `TRANSPORT_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TransportSettings;

/// Directory searched for per-environment config files.
pub const DEFAULT_CONFIG_DIR: &str = "configs";

/// Environment variable selecting the deployment environment.
pub const APP_ENV_VAR: &str = "APP_ENV";

/// Current deployment environment, `dev` when unset.
pub fn app_env() -> String {
    read_env_string(APP_ENV_VAR).unwrap_or_else(|| "dev".to_string())
}

/// Path of the config file for `env` under `dir` (`config_{env}.json`).
pub fn config_path(dir: &Path, env: &str) -> PathBuf {
    dir.join(format!("config_{env}.json"))
}

/// Load settings from `configs/config_{APP_ENV}.json` with env overrides.
pub fn load_settings() -> Result<TransportSettings> {
    load_settings_from_path(&config_path(Path::new(DEFAULT_CONFIG_DIR), &app_env()))
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<TransportSettings> {
    let mut settings = load_file_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layers(path: &Path) -> Result<TransportSettings> {
    let defaults = serde_json::to_value(TransportSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut TransportSettings) {
    // ── App ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_string(APP_ENV_VAR) {
        settings.app.env = v;
    }
    if let Some(v) = read_env_string("TRANSPORT_METRICS_ADDR") {
        settings.app.metrics_addr = v;
    }
    if settings.app.node_id.is_empty() {
        if let Some(v) = node_id_from_env(&["TRANSPORT_NODE_ID", "NODE_ID", "POD_NAME"]) {
            settings.app.node_id = v;
        }
    }

    // ── Log ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TRANSPORT_LOG_LEVEL") {
        settings.log.level = v;
    }
    if let Some(v) = read_env_string("TRANSPORT_LOG_FORMAT") {
        match v.parse() {
            Ok(format) => settings.log.format = format,
            Err(e) => tracing::warn!(key = "TRANSPORT_LOG_FORMAT", error = %e, "ignoring"),
        }
    }
    if let Some(v) = read_env_bool("TRANSPORT_LOG_REPORT_CALLER") {
        settings.log.report_caller = v;
    }

    // ── Bridge client ───────────────────────────────────────────────
    if let Some(v) = read_env_string("TRANSPORT_BRIDGE_ADDRESS") {
        settings.bridge_client.address = v;
    }
    if let Some(v) = read_env_string("TRANSPORT_BRIDGE_NAMESPACE") {
        settings.bridge_client.namespace = v;
    }
    if let Some(v) = read_env_bool("TRANSPORT_BRIDGE_INSECURE") {
        settings.bridge_client.insecure = v;
    }
    if let Some(v) = read_env_u64("TRANSPORT_BRIDGE_DIAL_TIMEOUT_SECONDS", 1, 300) {
        settings.bridge_client.dial_timeout_seconds = v;
    }
    if let Some(v) = read_env_u64("TRANSPORT_BRIDGE_HEARTBEAT_INTERVAL_SECONDS", 1, 3600) {
        settings.bridge_client.heartbeat_interval_seconds = v;
    }
    if let Some(v) = read_env_bool("TRANSPORT_BRIDGE_ENABLE_BACKPRESSURE") {
        settings.bridge_client.enable_backpressure = v;
    }
    if let Some(v) = read_env_usize("TRANSPORT_BRIDGE_MAX_INFLIGHT_DELIVER", 1, 100_000) {
        settings.bridge_client.max_inflight_deliver = v;
    }

    // ── Bridge server ───────────────────────────────────────────────
    if let Some(v) = read_env_string("TRANSPORT_LISTEN_ADDR") {
        settings.bridge_server.listen_addr = v;
    }
    if let Some(v) = read_env_string("TRANSPORT_SERVER_NAMESPACE") {
        settings.bridge_server.namespace = v;
    }
    if let Some(v) = read_env_bool("TRANSPORT_SERVER_INSECURE") {
        settings.bridge_server.insecure = v;
    }
    if let Some(v) = read_env_u64("TRANSPORT_SHUTDOWN_TIMEOUT_SECONDS", 0, 3600) {
        settings.bridge_server.graceful_shutdown_timeout_seconds = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    let secret = secret_or_env("TRANSPORT_AUTH_SECRET", "");
    if !secret.is_empty() {
        settings.auth.secret_key = secret;
    }
    if let Some(v) = read_env_bool("TRANSPORT_AUTH_REQUIRED") {
        settings.auth.required = v;
    }
}

// ── Secrets / identity ──────────────────────────────────────────────────────

/// Read a secret: the file named by `{NAME}_FILE`, then `{NAME}`, then
/// `default`.
pub fn secret_or_env(name: &str, default: &str) -> String {
    resolve_secret(
        read_env_string(&format!("{name}_FILE")).as_deref(),
        read_env_string(name).as_deref(),
        default,
    )
}

/// Pure form of [`secret_or_env`]. An unreadable file falls through to the
/// plain value.
pub fn resolve_secret(file_path: Option<&str>, value: Option<&str>, default: &str) -> String {
    if let Some(path) = file_path {
        match std::fs::read_to_string(path) {
            Ok(data) => return data.trim().to_string(),
            Err(e) => tracing::warn!(path, error = %e, "secret file unreadable, falling back"),
        }
    }
    value
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// First non-empty env var among `keys`, then `HOSTNAME`.
pub fn node_id_from_env(keys: &[&str]) -> Option<String> {
    resolve_node_id(keys, read_env_string)
}

/// Pure form of [`node_id_from_env`] over an arbitrary lookup.
pub fn resolve_node_id(keys: &[&str], lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    keys.iter()
        .copied()
        .chain(std::iter::once("HOSTNAME"))
        .find_map(|k| lookup(k).filter(|v| !v.is_empty()))
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
