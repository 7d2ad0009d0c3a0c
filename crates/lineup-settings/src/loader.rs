use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::Result;
use crate::types::LineupSettings;

/// `~/.lineup`, or `/tmp/.lineup` when `HOME` is unset.
pub fn lineup_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".lineup")
}

pub fn settings_path() -> PathBuf {
    lineup_home().join("settings.json")
}

/// Load from the default path.
pub fn load_settings() -> Result<LineupSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, deep-merged with the file at `path` (if it exists), then
/// `LINEUP_*` environment overrides, then validation.
pub fn load_settings_from_path(path: &Path) -> Result<LineupSettings> {
    let defaults = serde_json::to_value(LineupSettings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, user)
    } else {
        tracing::debug!(path = %path.display(), "no settings file, using defaults");
        defaults
    };

    let mut settings: LineupSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `LINEUP_*` overrides. Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut LineupSettings, lookup: impl Fn(&str) -> Option<String>) {
    fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let parsed = raw.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value = raw, "ignoring unparseable env override");
        }
        parsed
    }

    if let Some(v) = lookup("LINEUP_SETTLE_MS").and_then(|v| parse("LINEUP_SETTLE_MS", &v)) {
        settings.draft.settle_ms = v;
    }
    if let Some(v) = lookup("LINEUP_REMINDER_SECS").and_then(|v| parse("LINEUP_REMINDER_SECS", &v)) {
        settings.draft.reminder_secs = v;
    }
    if let Some(v) = lookup("LINEUP_DEADLINE_SECS").and_then(|v| parse("LINEUP_DEADLINE_SECS", &v)) {
        settings.draft.deadline_secs = v;
    }
    if let Some(v) = lookup("LINEUP_HANDOFF_WINDOW_SECS")
        .and_then(|v| parse("LINEUP_HANDOFF_WINDOW_SECS", &v))
    {
        settings.handoff.window_secs = v;
    }
    if let Some(v) = lookup("LINEUP_HOST_COMMAND") {
        settings.host.command = v;
    }
    if let Some(v) = lookup("LINEUP_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = lookup("LINEUP_LOG_JSON").and_then(|v| parse("LINEUP_LOG_JSON", &v)) {
        settings.logging.json = v;
    }
    if let Some(v) = lookup("LINEUP_STORE_ENABLED").and_then(|v| parse("LINEUP_STORE_ENABLED", &v)) {
        settings.store.enabled = v;
    }
    if let Some(v) = lookup("LINEUP_STORE_PATH") {
        settings.store.path = PathBuf::from(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn deep_merge_nested_objects() {
        let base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = serde_json::json!({"a": {"y": 20}, "c": 4});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["a"]["x"], 1);
        assert_eq!(merged["a"]["y"], 20);
        assert_eq!(merged["b"], 3);
        assert_eq!(merged["c"], 4);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let base = serde_json::json!({"roles": ["a", "b"]});
        let overlay = serde_json::json!({"roles": ["c"]});
        assert_eq!(deep_merge(base, overlay)["roles"], serde_json::json!(["c"]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.draft.deadline_secs, 600);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"draft": {"reminderSecs": 30, "slots": [{"token": "A", "label": "Top"}, {"token": "B", "label": "Jungle"}]},
                "host": {"allowedRoles": ["Captains"]}}"#,
        )
        .unwrap();

        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.draft.reminder_secs, 30);
        assert_eq!(s.draft.slots.len(), 2);
        assert_eq!(s.draft.slots[1].label, "Jungle");
        assert_eq!(s.host.allowed_roles, vec!["Captains"]);
        assert_eq!(s.host.command, "!hostfriendly");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("LINEUP_SETTLE_MS", "1500"),
            ("LINEUP_DEADLINE_SECS", "120"),
            ("LINEUP_LOG_JSON", "true"),
            ("LINEUP_STORE_PATH", "/var/lib/lineup.db"),
        ]
        .into_iter()
        .collect();

        let mut s = LineupSettings::default();
        apply_env_overrides(&mut s, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.draft.settle_ms, 1500);
        assert_eq!(s.draft.deadline_secs, 120);
        assert!(s.logging.json);
        assert_eq!(s.store.path, PathBuf::from("/var/lib/lineup.db"));
    }

    #[test]
    fn bad_env_value_is_ignored() {
        let mut s = LineupSettings::default();
        apply_env_overrides(&mut s, |k| (k == "LINEUP_SETTLE_MS").then(|| "soon".to_string()));
        assert_eq!(s.draft.settle_ms, 3_000);
    }
}
