// SPDX-License-Identifier: GPL-3.0-only

//! Persistent application configuration
//!
//! Stored as JSON under the platform config directory. Loaded once at
//! startup and passed down explicitly; nothing else reads the file.

use crate::backends::camera::{CameraBackendType, Resolution};
use crate::constants::{api, app_info, devices, patterns, timing, upload};
use crate::review::ApprovalPolicy;
use crate::sequencer::TestPattern;
use crate::session::{CameraSettings, ExposureMode, FocusMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No configuration directory on this platform")]
    NoConfigDir,
    #[error("Config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Backend environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Test sessions: staging backend, `test-images/` prefix
    #[default]
    Staging,
    Production,
}

impl Environment {
    /// Object key prefix for uploads made in this environment
    pub fn upload_prefix(self) -> &'static str {
        match self {
            Environment::Staging => upload::TEST_PREFIX,
            Environment::Production => upload::PRODUCTION_PREFIX,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// A URL per environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentUrls {
    pub staging: String,
    pub production: String,
}

impl EnvironmentUrls {
    pub fn for_env(&self, env: Environment) -> &str {
        match env {
            Environment::Staging => &self.staging,
            Environment::Production => &self.production,
        }
    }
}

/// Sequencing delays, all hardware dependent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_ms: u64,
    pub production_dwell_ms: u64,
    pub comparison_dwell_ms: u64,
    pub gap_ms: u64,
    pub ready_timeout_ms: u64,
    pub max_capture_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: timing::SETTLE_MS,
            production_dwell_ms: timing::PRODUCTION_DWELL_MS,
            comparison_dwell_ms: timing::COMPARISON_DWELL_MS,
            gap_ms: timing::GAP_MS,
            ready_timeout_ms: timing::READY_TIMEOUT_MS,
            max_capture_attempts: timing::MAX_CAPTURE_ATTEMPTS,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn production_dwell(&self) -> Duration {
        Duration::from_millis(self.production_dwell_ms)
    }

    pub fn comparison_dwell(&self) -> Duration {
        Duration::from_millis(self.comparison_dwell_ms)
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Camera state restored across runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    /// Last selected device id
    pub last_device_id: Option<String>,
    /// Last requested resolution
    pub last_resolution: Option<Resolution>,
    /// Written whenever the stream starts playing
    pub baseline: CameraSettings,
    /// Profile of the production pass
    pub production: CameraSettings,
    /// Profile of the automatic comparison pass
    pub auto: CameraSettings,
    /// Profile of the manual comparison pass
    pub manual: CameraSettings,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            last_device_id: None,
            last_resolution: None,
            baseline: CameraSettings::neutral(),
            production: CameraSettings {
                exposure_mode: Some(ExposureMode::Manual),
                exposure_time: Some(156),
                exposure_compensation: Some(0),
                focus_mode: Some(FocusMode::Manual),
                ..Default::default()
            },
            auto: CameraSettings::automatic(),
            manual: CameraSettings {
                exposure_mode: Some(ExposureMode::Manual),
                exposure_time: Some(312),
                exposure_compensation: Some(0),
                focus_mode: Some(FocusMode::Manual),
                focus_distance: Some(0),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend and upload destination
    pub environment: Environment,
    /// REST API base URL per environment
    pub api_url: EnvironmentUrls,
    /// Public object storage base URL per environment
    pub storage_url: EnvironmentUrls,
    /// Bearer token for object storage writes
    pub storage_token: Option<String>,
    /// Camera backend to use
    pub backend: CameraBackendType,
    pub timing: TimingConfig,
    /// What approval does with pending or failed uploads
    pub approval_policy: ApprovalPolicy,
    /// Device labels never offered for selection (case-insensitive substrings)
    pub device_denylist: Vec<String>,
    /// Pattern names in display order
    pub patterns: Vec<String>,
    pub settings: PersistedSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_url: EnvironmentUrls {
                staging: api::STAGING_BASE_URL.to_string(),
                production: api::PRODUCTION_BASE_URL.to_string(),
            },
            storage_url: EnvironmentUrls {
                staging: api::STAGING_STORAGE_URL.to_string(),
                production: api::PRODUCTION_STORAGE_URL.to_string(),
            },
            storage_token: None,
            backend: CameraBackendType::default(),
            timing: TimingConfig::default(),
            approval_policy: ApprovalPolicy::default(),
            device_denylist: devices::LABEL_DENYLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            patterns: patterns::DEFAULT_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            settings: PersistedSettings::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_info::APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`
    ///
    /// A missing file yields defaults; an unreadable or malformed one yields
    /// defaults and a warning.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn api_base_url(&self) -> &str {
        self.api_url.for_env(self.environment)
    }

    pub fn storage_base_url(&self) -> &str {
        self.storage_url.for_env(self.environment)
    }

    /// Configured patterns in display order
    ///
    /// Pattern names key uploads and panel records, so a repeated name is
    /// dropped after its first occurrence.
    pub fn test_patterns(&self) -> Vec<TestPattern> {
        let mut patterns: Vec<TestPattern> = Vec::with_capacity(self.patterns.len());
        for name in &self.patterns {
            let name = name.trim();
            if name.is_empty() {
                warn!("Ignoring unnamed test pattern");
                continue;
            }
            if patterns.iter().any(|p| p.name == name) {
                warn!(pattern = name, "Ignoring duplicate test pattern");
                continue;
            }
            patterns.push(TestPattern::named(name));
        }
        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_pattern_names_are_dropped() {
        let config = Config {
            patterns: ["white", "black", "white", " ", "black "]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        };

        let names: Vec<_> = config.test_patterns().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["white", "black"]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"environment":"production","timing":{"gap_ms":10}}"#).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.timing.gap_ms, 10);
        assert_eq!(config.timing.settle_ms, timing::SETTLE_MS);
        assert_eq!(config.patterns.len(), 15);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = Config::default();
        config.settings.last_device_id = Some("/dev/video2".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_environment_selects_urls_and_prefix() {
        let mut config = Config::default();
        assert_eq!(config.api_base_url(), api::STAGING_BASE_URL);
        assert_eq!(config.environment.upload_prefix(), "test-images");

        config.environment = Environment::Production;
        assert_eq!(config.storage_base_url(), api::PRODUCTION_STORAGE_URL);
        assert_eq!(config.environment.upload_prefix(), "production-images");
    }
}
