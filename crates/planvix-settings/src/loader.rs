//! Settings loading with deep merge, environment overrides, and validation.
//!
//! Loading flow:
//! 1. Start with compiled [`PlanvixSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PLANVIX_*` environment overrides
//! 4. [`validate`] the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::PlanvixSettings;

/// `~/.planvix`, or `/tmp/.planvix` when `HOME` is unset.
pub fn planvix_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".planvix")
}

/// Default settings file (`~/.planvix/settings.json`).
pub fn settings_path() -> PathBuf {
    planvix_dir().join("settings.json")
}

/// Load settings from the default path.
pub fn load_settings() -> Result<PlanvixSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides applied.
///
/// A missing file yields defaults; invalid JSON or a failed validation is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<PlanvixSettings> {
    let defaults = serde_json::to_value(PlanvixSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PlanvixSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
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
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PLANVIX_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning, leaving the file/default value.
pub fn apply_env_overrides<F>(settings: &mut PlanvixSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("PLANVIX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PLANVIX_PORT", |s| parse_u16_range(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("PLANVIX_MAX_CONNECTIONS", |s| parse_usize_range(s, 1, 100_000)) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("PLANVIX_REPLAY_LIMIT", |s| parse_usize_range(s, 1, 500)) {
        settings.feed.replay_limit = v;
    }
    if let Some(v) = env.parsed("PLANVIX_KEEPALIVE_INTERVAL_MS", |s| {
        parse_u64_range(s, 100, 3_600_000)
    }) {
        settings.feed.keepalive_interval_ms = v;
    }
    if let Some(v) = env.parsed("PLANVIX_LIVENESS_TIMEOUT_MS", |s| {
        parse_u64_range(s, 100, 86_400_000)
    }) {
        settings.feed.liveness_timeout_ms = v;
    }
    if let Some(v) = env.string("PLANVIX_SECRET_KEY") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.string("PLANVIX_DB_PATH") {
        settings.storage.db_path = Some(v);
    }
    if let Some(v) = env.string("PLANVIX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("PLANVIX_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

/// Check cross-field constraints.
pub fn validate(settings: &PlanvixSettings) -> Result<()> {
    let feed = &settings.feed;
    let client = &settings.client;

    if feed.replay_limit < 1 {
        return invalid("feed.replayLimit must be at least 1");
    }
    if feed.send_queue_capacity <= feed.replay_limit {
        return invalid(format!(
            "feed.sendQueueCapacity ({}) must exceed feed.replayLimit ({})",
            feed.send_queue_capacity, feed.replay_limit
        ));
    }
    if feed.keepalive_interval_ms == 0 {
        return invalid("feed.keepaliveIntervalMs must be positive");
    }
    if feed.liveness_timeout_ms < feed.keepalive_interval_ms {
        return invalid(format!(
            "feed.livenessTimeoutMs ({}) is shorter than feed.keepaliveIntervalMs ({})",
            feed.liveness_timeout_ms, feed.keepalive_interval_ms
        ));
    }
    if settings.server.max_connections == 0 {
        return invalid("server.maxConnections must be at least 1");
    }
    if client.reconnect_factor.is_nan() || client.reconnect_factor <= 1.0 {
        return invalid(format!(
            "client.reconnectFactor ({}) must be greater than 1",
            client.reconnect_factor
        ));
    }
    if client.reconnect_floor_ms > client.reconnect_ceiling_ms {
        return invalid(format!(
            "client.reconnectFloorMs ({}) exceeds client.reconnectCeilingMs ({})",
            client.reconnect_floor_ms, client.reconnect_ceiling_ms
        ));
    }
    if client.keepalive_interval_ms == 0 {
        return invalid("client.keepaliveIntervalMs must be positive");
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(SettingsError::InvalidValue(message.into()))
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"server": {"port": 8000, "host": "0.0.0.0"}}),
            json!({"server": {"port": 9000}}),
        );
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            json!({"roles": ["admin", "superadmin"]}),
            json!({"roles": ["ops"]}),
        );
        assert_eq!(merged["roles"], json!(["ops"]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.feed.replay_limit, 20);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100}, "storage": {"dbPath": ":memory:"}, "auth": {"allowedRoles": ["ops"]}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.max_connections, 64);
        assert_eq!(settings.storage.db_path.as_deref(), Some(":memory:"));
        assert_eq!(settings.auth.allowed_roles, vec!["ops".to_string()]);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn inconsistent_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"feed": {"replayLimit": 300}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("sendQueueCapacity")
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = PlanvixSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("PLANVIX_HOST", "127.0.0.1"),
                ("PLANVIX_PORT", "9001"),
                ("PLANVIX_REPLAY_LIMIT", "50"),
                ("PLANVIX_SECRET_KEY", "s3cret"),
                ("PLANVIX_DB_PATH", ":memory:"),
                ("PLANVIX_LOG_JSON", "yes"),
                ("PLANVIX_LIVENESS_TIMEOUT_MS", "120000"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.feed.replay_limit, 50);
        assert_eq!(settings.auth.jwt_secret, "s3cret");
        assert_eq!(settings.storage.db_path.as_deref(), Some(":memory:"));
        assert!(settings.logging.json);
        assert_eq!(settings.feed.liveness_timeout_ms, 120_000);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = PlanvixSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("PLANVIX_PORT", "0"),
                ("PLANVIX_REPLAY_LIMIT", "501"),
                ("PLANVIX_LOG_JSON", "maybe"),
                ("PLANVIX_HOST", ""),
            ]),
        );
        assert_eq!(settings, PlanvixSettings::default());
    }

    // ── validate ────────────────────────────────────────────────────

    #[test]
    fn defaults_are_valid() {
        validate(&PlanvixSettings::default()).unwrap();
    }

    #[test]
    fn factor_must_exceed_one() {
        let mut settings = PlanvixSettings::default();
        settings.client.reconnect_factor = 1.0;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn floor_must_not_exceed_ceiling() {
        let mut settings = PlanvixSettings::default();
        settings.client.reconnect_floor_ms = 60_000;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(msg)) if msg.contains("reconnectFloorMs"));
    }

    #[test]
    fn liveness_must_cover_keepalive() {
        let mut settings = PlanvixSettings::default();
        settings.feed.liveness_timeout_ms = 10_000;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(msg)) if msg.contains("livenessTimeoutMs"));
    }

    #[test]
    fn replay_limit_zero_rejected() {
        let mut settings = PlanvixSettings::default();
        settings.feed.replay_limit = 0;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    // ── parse helpers ───────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8000", 1, 65535), Some(8000));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("99", 100, 200), None);
        assert_eq!(parse_usize_range("20", 1, 500), Some(20));
        assert_eq!(parse_usize_range("-1", 1, 500), None);
    }
}
