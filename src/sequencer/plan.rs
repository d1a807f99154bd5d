// SPDX-License-Identifier: GPL-3.0-only

//! Capture plan: patterns, modes and per-pass settings profiles

use crate::config::Config;
use crate::constants::patterns;
use crate::session::CameraSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A full-screen test pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPattern {
    /// Unique key, used in upload keys and review
    pub name: String,
    /// Asset shown by the display host
    pub asset: String,
}

impl TestPattern {
    pub fn new(name: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset: asset.into(),
        }
    }

    /// Pattern with the bundled asset for `name`
    pub fn named(name: &str) -> Self {
        Self::new(name, patterns::asset_for(name))
    }
}

/// Operating mode of a capture run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// One pass with the production profile
    #[default]
    Production,
    /// Automatic pass followed by a manual pass for config discovery
    Comparison,
}

impl CaptureMode {
    pub fn passes(self) -> &'static [PassKind] {
        match self {
            CaptureMode::Production => &[PassKind::Production],
            CaptureMode::Comparison => &[PassKind::Auto, PassKind::Manual],
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Production => write!(f, "production"),
            CaptureMode::Comparison => write!(f, "comparison"),
        }
    }
}

/// One sweep over all patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Production,
    Auto,
    Manual,
}

impl PassKind {
    pub fn name(self) -> &'static str {
        match self {
            PassKind::Production => "production",
            PassKind::Auto => "auto",
            PassKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings and dwell of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassProfile {
    pub kind: PassKind,
    pub settings: CameraSettings,
    pub dwell: Duration,
}

/// Everything a run needs, resolved up front
#[derive(Debug, Clone)]
pub struct SequencePlan {
    pub mode: CaptureMode,
    pub patterns: Vec<TestPattern>,
    pub passes: Vec<PassProfile>,
    /// Pause after each capture
    pub gap: Duration,
    /// Null captures tolerated per slot
    pub max_attempts: u32,
    /// How long to wait for the session before giving up
    pub ready_timeout: Duration,
}

impl SequencePlan {
    pub fn from_config(mode: CaptureMode, config: &Config) -> Self {
        let settings = &config.settings;
        let timing = &config.timing;
        let passes = mode
            .passes()
            .iter()
            .map(|&kind| {
                let (settings, dwell) = match kind {
                    PassKind::Production => (&settings.production, timing.production_dwell()),
                    PassKind::Auto => (&settings.auto, timing.comparison_dwell()),
                    PassKind::Manual => (&settings.manual, timing.comparison_dwell()),
                };
                PassProfile {
                    kind,
                    settings: settings.clone(),
                    dwell,
                }
            })
            .collect();

        Self {
            mode,
            patterns: config.test_patterns(),
            passes,
            gap: timing.gap(),
            max_attempts: timing.max_capture_attempts.max(1),
            ready_timeout: timing.ready_timeout(),
        }
    }

    /// Same plan without the given passes, for recapturing what is still open
    pub fn without_passes(&self, settled: &[PassKind]) -> SequencePlan {
        SequencePlan {
            passes: self
                .passes
                .iter()
                .filter(|p| !settled.contains(&p.kind))
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Frames a complete run produces
    pub fn expected_frames(&self) -> usize {
        self.patterns.len() * self.passes.len()
    }
}
