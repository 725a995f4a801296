//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `GLEAM_*` environment variable overrides (highest priority)
//! 4. [`GatewaySettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BackPressurePolicy, GatewaySettings};

/// Resolve the default settings file (`~/.gleam/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gleam").join("settings.json")
}

/// Load settings from the default path.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, apply env overrides, and validate.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
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

/// Apply `GLEAM_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid or out-of-range values are ignored with a warning, leaving the
/// file/default value in place.
pub fn apply_overrides<F>(settings: &mut GatewaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("GLEAM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("GLEAM_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u16("GLEAM_HTTP_PORT", 0, 65535) {
        settings.server.http_port = v;
    }
    if let Some(v) = env.usize("GLEAM_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Wire / connection ───────────────────────────────────────────
    if let Some(v) = env.usize("GLEAM_MAX_FRAME_SIZE", 16, 1 << 30) {
        settings.wire.max_frame_size = v;
    }
    if let Some(v) = env.usize("GLEAM_WRITE_QUEUE_DEPTH", 1, 1_000_000) {
        settings.connection.write_queue_depth = v;
    }
    if let Some(v) = env.back_pressure("GLEAM_BACK_PRESSURE") {
        settings.connection.back_pressure = v;
    }
    if let Some(v) = env.u64("GLEAM_HEARTBEAT_TIMEOUT_MS", 100, 3_600_000) {
        settings.connection.heartbeat_timeout_ms = v;
    }

    // ── Dispatch ────────────────────────────────────────────────────
    if let Some(v) = env.usize("GLEAM_MAX_CONCURRENT_HANDLERS", 1, 100_000) {
        settings.dispatch.max_concurrent_handlers = v;
    }
    if let Some(v) = env.u64("GLEAM_HANDLER_TIMEOUT_MS", 1, 600_000) {
        settings.dispatch.handler_timeout_ms = v;
    }

    // ── Backends ────────────────────────────────────────────────────
    if let Some(v) = env.bool("GLEAM_DB_ENABLED") {
        settings.database.enabled = v;
    }
    if let Some(v) = env.string("GLEAM_DB_PATH") {
        settings.database.path = Some(v);
    }
    if let Some(v) = env.usize("GLEAM_DB_POOL_SIZE", 1, 1_000) {
        settings.database.pool.max_size = v;
    }
    if let Some(v) = env.bool("GLEAM_CACHE_ENABLED") {
        settings.cache.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("GLEAM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("GLEAM_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.clone())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "GLEAM_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
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

/// Parse a back-pressure policy name (`reject` or `block`).
pub fn parse_back_pressure(val: &str) -> Option<BackPressurePolicy> {
    match val.to_lowercase().as_str() {
        "reject" => Some(BackPressurePolicy::Reject),
        "block" => Some(BackPressurePolicy::Block),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn back_pressure(&self, name: &str) -> Option<BackPressurePolicy> {
        self.parsed(name, "policy", parse_back_pressure)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
