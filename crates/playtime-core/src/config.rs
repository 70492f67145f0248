//! TOML daemon configuration.
//!
//! Read once at startup from `/etc/playtime/config.toml` (or the
//! `--config` override). A missing file yields defaults; a malformed
//! file is a hard error so the daemon never runs with half a config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default configuration path for the system daemon.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/playtime/config.toml";

/// Default database path under the daemon's state directory.
pub const DEFAULT_DB_PATH: &str = "/var/lib/playtime/playtime.db";

/// Enforcement mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonMode {
    /// Monitor and enforce limits for known patterns.
    Normal,
    /// Compute states and emit events but never kill anything.
    Passthrough,
    /// Additionally warn-then-terminate unknown high-CPU processes.
    Strict,
}

impl DaemonMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DaemonMode::Normal => "normal",
            DaemonMode::Passthrough => "passthrough",
            DaemonMode::Strict => "strict",
        }
    }
}

/// How the router picks among enabled template variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantSelection {
    Random,
    Sequential,
}

/// `[daemon]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Seconds between ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Local hour at which the tracking day rolls over.
    #[serde(default = "default_reset_hour")]
    pub reset_hour: u32,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_mode")]
    pub mode: DaemonMode,
    /// Seconds between budget exhaustion and enforcement.
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
    /// Warning thresholds in minutes-remaining, largest first.
    #[serde(default = "default_warning_thresholds")]
    pub warning_thresholds: Vec<u32>,
    /// CPU gate applied when a pattern carries no threshold of its own.
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f32,
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum smoothed CPU% for an unknown process to become a candidate.
    #[serde(default = "default_discovery_cpu")]
    pub cpu_threshold: f32,
    /// Observation window for candidate promotion.
    #[serde(default = "default_sample_window")]
    pub sample_window_seconds: u64,
    /// Samples within the window required for promotion.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
}

/// `[messages]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesSection {
    #[serde(default = "default_variant_selection")]
    pub variant_selection: VariantSelection,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub messages: MessagesSection,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_reset_hour() -> u32 {
    4
}
fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}
fn default_mode() -> DaemonMode {
    DaemonMode::Normal
}
fn default_grace_period() -> u64 {
    60
}
fn default_warning_thresholds() -> Vec<u32> {
    vec![30, 15, 5]
}
fn default_cpu_threshold() -> f32 {
    5.0
}
fn default_true() -> bool {
    true
}
fn default_discovery_cpu() -> f32 {
    25.0
}
fn default_sample_window() -> u64 {
    120
}
fn default_min_samples() -> u32 {
    3
}
fn default_variant_selection() -> VariantSelection {
    VariantSelection::Random
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            reset_hour: default_reset_hour(),
            db_path: default_db_path(),
            mode: default_mode(),
            grace_period_seconds: default_grace_period(),
            warning_thresholds: default_warning_thresholds(),
            cpu_threshold: default_cpu_threshold(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: default_discovery_cpu(),
            sample_window_seconds: default_sample_window(),
            min_samples: default_min_samples(),
        }
    }
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            variant_selection: default_variant_selection(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSection::default(),
            discovery: DiscoverySection::default(),
            messages: MessagesSection::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or defaults if the file does not exist.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadFailed`] if the file exists but cannot
    /// be read or parsed, or if a value is out of range.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str::<DaemonConfig>(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.reset_hour > 23 {
            return Err(ConfigError::InvalidValue {
                key: "daemon.reset_hour".into(),
                message: format!("must be 0-23, got {}", self.daemon.reset_hour),
            });
        }
        if self.daemon.poll_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "daemon.poll_interval".into(),
                message: "must be at least 1 second".into(),
            });
        }
        if self.daemon.warning_thresholds.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "daemon.warning_thresholds".into(),
                message: "must list at least one threshold".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.daemon.poll_interval, 30);
        assert_eq!(cfg.daemon.reset_hour, 4);
        assert_eq!(cfg.daemon.mode, DaemonMode::Normal);
        assert_eq!(cfg.daemon.warning_thresholds, vec![30, 15, 5]);
        assert_eq!(cfg.discovery.min_samples, 3);
    }

    #[test]
    fn parses_partial_file() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            [daemon]
            poll_interval = 10
            mode = "passthrough"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.daemon.poll_interval, 10);
        assert_eq!(cfg.daemon.mode, DaemonMode::Passthrough);
        // Unspecified sections fall back to defaults.
        assert_eq!(cfg.daemon.reset_hour, 4);
        assert_eq!(cfg.discovery.sample_window_seconds, 120);
    }

    #[test]
    fn rejects_out_of_range_reset_hour() {
        let cfg: DaemonConfig = toml::from_str("[daemon]\nreset_hour = 24\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = DaemonConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.daemon.poll_interval, cfg.daemon.poll_interval);
        assert_eq!(parsed.messages.variant_selection, VariantSelection::Random);
    }
}
