// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Sequencing delays (milliseconds)
///
/// All of these are defaults; the effective values come from
/// [`crate::config::TimingConfig`].
pub mod timing {
    /// Wait after applying settings before trusting them
    pub const SETTLE_MS: u64 = 500;

    /// Pattern dwell in production capture
    pub const PRODUCTION_DWELL_MS: u64 = 1000;

    /// Pattern dwell in auto/manual comparison (manual exposure converges slower)
    pub const COMPARISON_DWELL_MS: u64 = 2000;

    /// Gap between a capture and the next pattern
    pub const GAP_MS: u64 = 400;

    /// Bound between device open and the first frame
    pub const READY_TIMEOUT_MS: u64 = 5000;

    /// Capture attempts per slot before the run stalls
    pub const MAX_CAPTURE_ATTEMPTS: u32 = 3;
}

/// Device enumeration
pub mod devices {
    /// Labels containing any of these (case-insensitive) are never offered
    pub const LABEL_DENYLIST: &[&str] = &["OBS", "Virtual", "loopback"];
}

/// Capture stream parameters
pub mod pipeline {
    /// Mmap buffers requested from V4L2
    pub const MMAP_BUFFERS: u32 = 4;

    /// Poll timeout of the capture thread (milliseconds)
    pub const DEQUEUE_TIMEOUT_MS: u64 = 250;
}

/// Test patterns shown during a capture run, in display order
pub mod patterns {
    pub const DEFAULT_PATTERNS: &[&str] = &[
        "white",
        "black",
        "red",
        "green",
        "blue",
        "gray-25",
        "gray-50",
        "gray-75",
        "cyan",
        "magenta",
        "yellow",
        "checkerboard",
        "horizontal-gradient",
        "vertical-gradient",
        "color-bars",
    ];

    /// Asset reference for a pattern name
    pub fn asset_for(name: &str) -> String {
        format!("patterns/{}.png", name)
    }
}

/// Object storage layout
pub mod upload {
    /// Key prefix for test sessions
    pub const TEST_PREFIX: &str = "test-images";

    /// Key prefix for production data
    pub const PRODUCTION_PREFIX: &str = "production-images";

    pub const CONTENT_TYPE: &str = "image/png";
}

/// Backend endpoints
pub mod api {
    pub const STAGING_BASE_URL: &str = "https://staging-api.panel-inspection.example/api";
    pub const PRODUCTION_BASE_URL: &str = "https://api.panel-inspection.example/api";
    pub const STAGING_STORAGE_URL: &str = "https://staging-storage.panel-inspection.example";
    pub const PRODUCTION_STORAGE_URL: &str = "https://storage.panel-inspection.example";

    /// HTTP request timeout (seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Directory name under the platform config and picture directories
    pub const APP_DIR: &str = "panel-capture";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_are_unique() {
        let mut names = patterns::DEFAULT_PATTERNS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 15);
    }

    #[test]
    fn test_comparison_dwell_is_longer() {
        assert!(timing::COMPARISON_DWELL_MS > timing::PRODUCTION_DWELL_MS);
    }
}
