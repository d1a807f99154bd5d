// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// Video4Linux2 capture devices
    #[default]
    V4l2,
    /// Synthetic frames, no hardware
    Synthetic,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// A capture device as reported by the platform inventory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureDevice {
    /// Opaque identifier, stable for the lifetime of the process (V4L2: device path)
    pub id: String,
    /// Human-readable label (V4L2 card name)
    pub label: String,
    /// Kernel driver, when known
    pub driver: Option<String>,
}

impl std::fmt::Display for CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Frame size offered by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Label shown in selection lists, e.g. "1920x1080"
    pub fn label(&self) -> String {
        self.to_string()
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of a raw frame as delivered by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel), the canonical raster format
    RGBA,
    /// YUYV - packed 4:2:2 (Y0 U Y1 V)
    YUYV,
    /// Motion-JPEG, one JPEG image per frame
    MJPEG,
}

impl PixelFormat {
    /// Map a V4L2 FourCC to a supported pixel format
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YUYV" => Some(PixelFormat::YUYV),
            b"MJPG" => Some(PixelFormat::MJPEG),
            b"AB24" | b"RGBA" => Some(PixelFormat::RGBA),
            _ => None,
        }
    }
}

/// A raw frame copied out of the live stream
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Frame bytes in `format` layout
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Row stride in bytes (0 for compressed formats)
    pub stride: u32,
    pub captured_at: Instant,
}

/// Controls a backend may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    ExposureMode,
    ExposureTime,
    ExposureCompensation,
    FocusMode,
    FocusDistance,
    Brightness,
    Contrast,
}

impl ControlKind {
    pub const ALL: [ControlKind; 7] = [
        ControlKind::ExposureMode,
        ControlKind::ExposureTime,
        ControlKind::ExposureCompensation,
        ControlKind::FocusMode,
        ControlKind::FocusDistance,
        ControlKind::Brightness,
        ControlKind::Contrast,
    ];
}

/// Describes the range of an integer control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub min: i32,
    pub max: i32,
    /// Step size (at least 1)
    pub step: i32,
    pub default: i32,
}

impl ControlRange {
    pub fn new(min: i32, max: i32, step: i32, default: i32) -> Self {
        Self {
            min,
            max,
            step: step.max(1),
            default,
        }
    }

    /// Clamp `value` into range and snap it onto the step grid
    pub fn clamp(&self, value: i32) -> i32 {
        let clamped = value.clamp(self.min, self.max);
        let offset = (clamped - self.min) / self.step * self.step;
        self.min + offset
    }
}

/// Capability set of the active device
///
/// A control is supported if it has an entry; menu/boolean controls carry a
/// nominal 0..1 range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    controls: std::collections::HashMap<ControlKind, ControlRange>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ControlKind, range: ControlRange) -> Self {
        self.controls.insert(kind, range);
        self
    }

    pub fn insert(&mut self, kind: ControlKind, range: ControlRange) {
        self.controls.insert(kind, range);
    }

    pub fn supports(&self, kind: ControlKind) -> bool {
        self.controls.contains_key(&kind)
    }

    pub fn range(&self, kind: ControlKind) -> Option<ControlRange> {
        self.controls.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Supported kinds in declaration order
    pub fn kinds(&self) -> Vec<ControlKind> {
        ControlKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }
}

/// A single control write, already filtered against capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlValue {
    /// true = automatic exposure
    ExposureAuto(bool),
    ExposureTime(i32),
    ExposureCompensation(i32),
    /// true = autofocus (auto and continuous map here)
    FocusAuto(bool),
    FocusDistance(i32),
    Brightness(i32),
    Contrast(i32),
}

impl ControlValue {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlValue::ExposureAuto(_) => ControlKind::ExposureMode,
            ControlValue::ExposureTime(_) => ControlKind::ExposureTime,
            ControlValue::ExposureCompensation(_) => ControlKind::ExposureCompensation,
            ControlValue::FocusAuto(_) => ControlKind::FocusMode,
            ControlValue::FocusDistance(_) => ControlKind::FocusDistance,
            ControlValue::Brightness(_) => ControlKind::Brightness,
            ControlValue::Contrast(_) => ControlKind::Contrast,
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Camera device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Opening or configuring the stream failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
    /// Access to the device was refused
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Operation needs an open stream
    #[error("No active stream")]
    NotStreaming,
    /// Control write rejected by the driver
    #[error("Control {kind:?} rejected: {reason}")]
    ControlRejected { kind: ControlKind, reason: String },
    /// General I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_range_clamps_and_snaps() {
        let range = ControlRange::new(0, 255, 5, 128);
        assert_eq!(range.clamp(-10), 0);
        assert_eq!(range.clamp(300), 255);
        assert_eq!(range.clamp(12), 10);

        let unit = ControlRange::new(-3, 3, 0, 0);
        assert_eq!(unit.step, 1);
        assert_eq!(unit.clamp(2), 2);
    }

    #[test]
    fn test_capabilities_kinds_in_order() {
        let caps = Capabilities::new()
            .with(ControlKind::Contrast, ControlRange::new(0, 10, 1, 5))
            .with(ControlKind::FocusMode, ControlRange::new(0, 1, 1, 1));
        assert_eq!(
            caps.kinds(),
            vec![ControlKind::FocusMode, ControlKind::Contrast]
        );
        assert!(!caps.supports(ControlKind::ExposureMode));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::YUYV));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), Some(PixelFormat::MJPEG));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }

    #[test]
    fn test_resolution_label() {
        assert_eq!(Resolution::new(1920, 1080).label(), "1920x1080");
    }
}
