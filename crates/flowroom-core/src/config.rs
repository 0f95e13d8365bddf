//! Runtime configuration for a flowroom session.
//!
//! Layered with the following priority (highest first):
//! 1. Overrides (CLI flags / environment, filled in by the binary)
//! 2. TOML config file
//! 3. Compiled defaults
//!
//! Only operational knobs live here. Product thresholds (broadcast minimum,
//! start cooldown, inactivity confirmation window, countdown clamp) are constants.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Values that parse but cannot work together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FlowConfigFile {
    timer: TimerFileConfig,
    presence: PresenceFileConfig,
    broadcast: BroadcastFileConfig,
    guest: GuestFileConfig,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimerFileConfig {
    tick_interval_ms: Option<u64>,
    snapshot_interval_secs: Option<u64>,
    drift_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    heartbeat_interval_secs: Option<u64>,
    freshness_window_secs: Option<u64>,
    staleness_threshold_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BroadcastFileConfig {
    event_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GuestFileConfig {
    cache_path: Option<PathBuf>,
}

/// Values supplied from outside the file (CLI flags, env vars).
#[derive(Debug, Clone, Default)]
pub struct FlowOverrides {
    pub tick_interval_ms: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub staleness_threshold_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub cache_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Cadence of the timer tick loop.
    pub tick_interval_ms: u64,
    /// Elapsed seconds between persisted snapshots.
    pub snapshot_interval_secs: u64,
    /// Drift corrections kept for diagnostics.
    pub drift_history: usize,
    /// How often a session refreshes its presence record and timer heartbeat.
    pub heartbeat_interval_secs: u64,
    /// A session seen within this window counts as online.
    pub freshness_window_secs: u64,
    /// Sessions older than this are swept.
    pub staleness_threshold_secs: u64,
    pub sweep_interval_secs: u64,
    /// Lifetime of room broadcast events.
    pub event_ttl_secs: u64,
    /// Where guest tasks are kept; in memory when unset.
    pub cache_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            snapshot_interval_secs: 5,
            drift_history: 10,
            heartbeat_interval_secs: 30,
            freshness_window_secs: 65,
            staleness_threshold_secs: 70,
            sweep_interval_secs: 60,
            event_ttl_secs: 10,
            cache_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl FlowConfig {
    /// Load from an optional TOML file and apply overrides.
    ///
    /// A missing file is an error only when a path was given explicitly.
    pub fn load(path: Option<&Path>, overrides: &FlowOverrides) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
                    path: p.to_path_buf(),
                    source: e,
                })?;
                toml::from_str(&contents)?
            }
            None => FlowConfigFile::default(),
        };
        let config = Self::resolve(&file, overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FlowConfigFile = toml::from_str(contents)?;
        let config = Self::resolve(&file, &FlowOverrides::default());
        config.validate()?;
        Ok(config)
    }

    fn resolve(file: &FlowConfigFile, cli: &FlowOverrides) -> Self {
        let d = Self::default();
        Self {
            tick_interval_ms: cli
                .tick_interval_ms
                .or(file.timer.tick_interval_ms)
                .unwrap_or(d.tick_interval_ms),
            snapshot_interval_secs: file
                .timer
                .snapshot_interval_secs
                .unwrap_or(d.snapshot_interval_secs),
            drift_history: file.timer.drift_history.unwrap_or(d.drift_history),
            heartbeat_interval_secs: cli
                .heartbeat_interval_secs
                .or(file.presence.heartbeat_interval_secs)
                .unwrap_or(d.heartbeat_interval_secs),
            freshness_window_secs: file
                .presence
                .freshness_window_secs
                .unwrap_or(d.freshness_window_secs),
            staleness_threshold_secs: cli
                .staleness_threshold_secs
                .or(file.presence.staleness_threshold_secs)
                .unwrap_or(d.staleness_threshold_secs),
            sweep_interval_secs: cli
                .sweep_interval_secs
                .or(file.presence.sweep_interval_secs)
                .unwrap_or(d.sweep_interval_secs),
            event_ttl_secs: file.broadcast.event_ttl_secs.unwrap_or(d.event_ttl_secs),
            cache_path: cli
                .cache_path
                .clone()
                .or_else(|| file.guest.cache_path.clone()),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.log_level.clone())
                .unwrap_or(d.log_level),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 || self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tick and snapshot intervals must be positive".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0
            || self.heartbeat_interval_secs >= self.freshness_window_secs
        {
            return Err(ConfigError::Invalid(format!(
                "heartbeat interval ({}s) must be positive and shorter than the freshness window ({}s)",
                self.heartbeat_interval_secs, self.freshness_window_secs
            )));
        }
        if self.staleness_threshold_secs < self.freshness_window_secs {
            return Err(ConfigError::Invalid(format!(
                "staleness threshold ({}s) must not be shorter than the freshness window ({}s)",
                self.staleness_threshold_secs, self.freshness_window_secs
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_secs)
    }

    pub fn freshness_ms(&self) -> i64 {
        secs_to_ms(self.freshness_window_secs)
    }

    pub fn staleness_ms(&self) -> i64 {
        secs_to_ms(self.staleness_threshold_secs)
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FlowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.snapshot_interval_secs, 5);
        assert_eq!(config.freshness_ms(), 65_000);
        assert_eq!(config.staleness_ms(), 70_000);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = FlowConfig::from_toml_str(
            r#"
log_level = "debug"

[presence]
sweep_interval_secs = 15
"#,
        )
        .unwrap();
        assert_eq!(config.sweep_interval_secs, 15);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.tick_interval_ms, 1_000);
        assert_eq!(config.event_ttl_secs, 10);
    }

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(FlowConfig::from_toml_str("").unwrap(), FlowConfig::default());
    }

    #[test]
    fn overrides_beat_the_file() {
        let file: FlowConfigFile = toml::from_str(
            r#"
[timer]
tick_interval_ms = 500

[presence]
staleness_threshold_secs = 90
"#,
        )
        .unwrap();
        let overrides = FlowOverrides {
            tick_interval_ms: Some(250),
            ..FlowOverrides::default()
        };
        let config = FlowConfig::resolve(&file, &overrides);
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.staleness_threshold_secs, 90);
    }

    #[test]
    fn heartbeat_must_fit_in_freshness_window() {
        let err = FlowConfig::from_toml_str(
            r#"
[presence]
heartbeat_interval_secs = 65
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(matches!(
            FlowConfig::from_toml_str("[server]\nport = 1\n"),
            Err(ConfigError::ParseToml(_))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            FlowConfig::load(Some(&missing), &FlowOverrides::default()),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
