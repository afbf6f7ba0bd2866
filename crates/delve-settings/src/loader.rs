//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{DelveSettings, ResearchProfile};

/// `~/.delve`, or `/tmp/.delve` when `HOME` is unset.
pub fn delve_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".delve")
}

/// Resolve the path to the settings file (`~/.delve/settings.json`).
pub fn settings_path() -> PathBuf {
    delve_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DelveSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged result
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DelveSettings> {
    let defaults = serde_json::to_value(DelveSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DelveSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    resolve_output_paths(&mut settings);
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

/// Apply `DELVE_*` environment overrides. Invalid values are ignored.
pub fn apply_env_overrides(settings: &mut DelveSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from(settings: &mut DelveSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let ranged = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        parsed
    };

    // ── Research ────────────────────────────────────────────────────
    if let Some(v) = ranged("DELVE_POLL_INTERVAL_SECS", 1, 3600) {
        settings.research.poll_interval_secs = v;
    }
    if let Some(v) = ranged("DELVE_MAX_WAIT_SECS", 1, 86_400 * 2) {
        settings.research.max_wait_secs = v;
    }
    if let Some(v) = string("DELVE_GROUP_ID") {
        settings.research.group_id = v;
    }
    if let Some(v) = string("DELVE_PROFILE") {
        match parse_profile(&v) {
            Some(profile) => settings.research.profile = profile,
            None => tracing::warn!(value = %v, "invalid DELVE_PROFILE, ignoring"),
        }
    }

    // ── LLM ─────────────────────────────────────────────────────────
    if let Some(v) = string("DELVE_WORKER_MODEL") {
        settings.llm.worker_model = v;
    }
    if let Some(v) = string("DELVE_ANALYST_MODEL") {
        settings.llm.analyst_model = v;
    }

    // ── Graph / output ──────────────────────────────────────────────
    if let Some(v) = string("DELVE_GRAPH_URL") {
        settings.graph.base_url = v;
    }
    if let Some(v) = string("DELVE_SESSIONS_DIR") {
        settings.output.sessions_dir = v;
    }
}

fn resolve_output_paths(settings: &mut DelveSettings) {
    if settings.output.sessions_dir.is_empty() {
        settings.output.sessions_dir = delve_home().join("sessions").display().to_string();
    }
    if settings.output.ledger_path.is_empty() {
        settings.output.ledger_path = delve_home().join("ledger.db").display().to_string();
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_profile(val: &str) -> Option<ResearchProfile> {
    match val.to_lowercase().as_str() {
        "full" => Some(ResearchProfile::Full),
        "quick" | "test" => Some(ResearchProfile::Quick),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
