//! Configuration resolution for remotecodec.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/remotecodec/settings.json)
//! 3. Project config (.remotecodec/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete remotecodec configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub loopback: LoopbackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client-side connection establishment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long one connection attempt may take before it is retried.
    pub poll_interval_ms: u64,
    /// Delay multiplier applied after each failed attempt (1.0 = fixed interval).
    pub backoff_multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay_ms: u64,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Requests that may queue on a channel before callers wait.
    pub channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            backoff_multiplier: 1.0,
            max_delay_ms: 30_000,
            max_attempts: None,
            channel_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Session host limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Maximum live sessions per client connection.
    pub max_sessions: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { max_sessions: 16 }
    }
}

/// Shape of the built-in loopback decoder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Number of input slots.
    pub slot_count: usize,
    /// Capacity of each input slot in bytes.
    pub slot_capacity: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            slot_count: 4,
            slot_capacity: 1024 * 1024, // 1 MiB
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            let overlay = read_json(&project_path)?;
            config = merge_config(&config, overlay)?;
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Project-level settings file inside `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".remotecodec").join("settings.json")
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".remotecodec").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME").ok().map(|h| {
            PathBuf::from(h).join("Library/Application Support/remotecodec/settings.json")
        })
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("remotecodec").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    serde_json::from_value(read_json(path)?).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply the keys present in `overlay` on top of `base`.
///
/// Only keys the overlay file spells out take effect, so a project file can
/// set a value back to its default or clear `max_attempts` with `null`.
fn merge_config(base: &Config, overlay: Value) -> Result<Config> {
    let mut merged = serde_json::to_value(base)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
    merge_values(&mut merged, overlay);
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged config: {e}")))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("REMOTECODEC_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.connection.poll_interval_ms = n;
    }
    if let Some(n) = var("REMOTECODEC_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.connection.max_attempts = Some(n);
    }
    if let Some(n) = var("REMOTECODEC_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
        config.host.max_sessions = n;
    }
    if let Some(val) = var("REMOTECODEC_LOG_LEVEL") {
        config.logging.level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_polls_every_second_forever() {
        let config = Config::default();
        assert_eq!(config.connection.poll_interval(), Duration::from_secs(1));
        assert!(config.connection.max_attempts.is_none());
        assert!((config.connection.backoff_multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "connection": { "max_attempts": 5 } }"#).unwrap();
        assert_eq!(config.connection.max_attempts, Some(5));
        assert_eq!(config.connection.poll_interval_ms, 1_000);
        assert_eq!(config.loopback, LoopbackConfig::default());
    }

    #[test]
    fn project_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{ "connection": { "poll_interval_ms": 250 }, "loopback": { "slot_count": 2 } }"#,
        )
        .unwrap();

        let mut base = Config::default();
        base.connection.max_attempts = Some(9);
        let base = merge_config(&base, read_json(&path).unwrap()).unwrap();

        assert_eq!(base.connection.poll_interval_ms, 250);
        assert_eq!(base.connection.max_attempts, Some(9));
        assert_eq!(base.loopback.slot_count, 2);
        assert_eq!(base.loopback.slot_capacity, LoopbackConfig::default().slot_capacity);
    }

    #[test]
    fn project_file_restores_defaults_and_clears_attempts() {
        let mut base = Config::default();
        base.connection.poll_interval_ms = 5_000;
        base.connection.max_attempts = Some(9);
        base.logging.level = "debug".into();

        let overlay = serde_json::json!({
            "connection": { "poll_interval_ms": 1_000, "max_attempts": null },
        });
        let merged = merge_config(&base, overlay).unwrap();

        assert_eq!(merged.connection.poll_interval_ms, 1_000);
        assert_eq!(merged.connection.max_attempts, None);
        assert_eq!(merged.logging.level, "debug");
    }

    #[test]
    fn project_file_keeps_unmentioned_sections() {
        let mut base = Config::default();
        base.host.max_sessions = 3;
        base.loopback.slot_capacity = 512;
        base.logging.json = true;

        let overlay = serde_json::json!({ "loopback": { "slot_count": 8 } });
        let merged = merge_config(&base, overlay).unwrap();

        assert_eq!(merged.host.max_sessions, 3);
        assert_eq!(merged.loopback.slot_count, 8);
        assert_eq!(merged.loopback.slot_capacity, 512);
        assert!(merged.logging.json);
    }

    #[test]
    fn ill_typed_overlay_is_config_error() {
        let overlay = serde_json::json!({ "connection": { "poll_interval_ms": "soon" } });
        assert!(matches!(
            merge_config(&Config::default(), overlay),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("REMOTECODEC_POLL_INTERVAL_MS", "100"),
            ("REMOTECODEC_MAX_ATTEMPTS", "3"),
            ("REMOTECODEC_LOG_LEVEL", "debug"),
            ("REMOTECODEC_MAX_SESSIONS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(ToString::to_string));

        assert_eq!(config.connection.poll_interval_ms, 100);
        assert_eq!(config.connection.max_attempts, Some(3));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.host.max_sessions, HostConfig::default().max_sessions);
    }
}
