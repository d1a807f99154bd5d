// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture application
//!
//! Each component has its own error enum next to its code; [`AppError`]
//! collects them for the binary.

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::review::ReviewError;
use crate::sequencer::SequenceError;
use crate::session::SessionError;
use crate::upload::UploadError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Device acquisition
    #[error("Camera error: {0}")]
    Session(#[from] SessionError),
    /// Capture run
    #[error("Capture error: {0}")]
    Sequence(#[from] SequenceError),
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
    #[error("Review error: {0}")]
    Review(#[from] ReviewError),
    #[error("Backend error: {0}")]
    Api(#[from] ApiError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Storage/filesystem errors
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
    /// Ctrl+C while waiting on uploads or the operator
    #[error("Interrupted")]
    Interrupted,
    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl AppError {
    /// Whether the operator can fix this by retrying or reselecting a device
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Session(SessionError::DeviceUnavailable(_) | SessionError::NotReady(_))
                | AppError::Sequence(SequenceError::Stalled { .. })
                | AppError::Review(ReviewError::Submission(_))
                | AppError::Upload(_)
                | AppError::Api(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_message() {
        let err: AppError = SessionError::DeviceUnavailable("permission denied".to_string()).into();
        assert_eq!(err.to_string(), "Camera error: Camera unavailable: permission denied");
        assert!(err.is_recoverable());

        let err: AppError = SequenceError::CountMismatch {
            expected: 15,
            actual: 14,
        }
        .into();
        assert!(!err.is_recoverable());
    }
}
