//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `ROLLCALL_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{home_dir, Settings};

/// Resolve the default settings file (`~/.rollcall/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".rollcall").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ROLLCALL_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("ROLLCALL_DB_PATH") {
        settings.database_path = v;
    }
    if let Some(v) = env.parsed("ROLLCALL_ADMIN_IDS", parse_id_list) {
        settings.admin_ids = v;
    }

    // ── Reminders ───────────────────────────────────────────────────
    if let Some(v) =
        env.parsed("ROLLCALL_REMIND_BEFORE_MINUTES", |s| parse_u64_range(s, 1, 10_080))
    {
        settings.reminders.remind_before_minutes = v;
    }
    if let Some(v) =
        env.parsed("ROLLCALL_DELIVERY_TIMEOUT_MS", |s| parse_u64_range(s, 100, 600_000))
    {
        settings.reminders.delivery_timeout_ms = v;
    }

    // ── Events / sessions ───────────────────────────────────────────
    if let Some(v) = env.parsed("ROLLCALL_ACTIVE_GRACE_HOURS", |s| parse_u64_range(s, 0, 720)) {
        settings.events.active_grace_hours = v;
    }
    if let Some(v) = env.parsed("ROLLCALL_SESSION_IDLE_SECS", |s| parse_u64_range(s, 1, 86_400)) {
        settings.sessions.idle_timeout_secs = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.parsed("ROLLCALL_WORKERS", |s| parse_usize_range(s, 1, 256)) {
        settings.server.workers = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("ROLLCALL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("ROLLCALL_LOG_TO_SQLITE", parse_bool) {
        settings.logging.log_to_sqlite = v;
    }
    if let Some(v) = env.string("ROLLCALL_LOG_DB") {
        settings.logging.log_db_path = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Comma-separated actor ids. Any malformed entry rejects the whole list.
pub fn parse_id_list(val: &str) -> Option<Vec<i64>> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}
