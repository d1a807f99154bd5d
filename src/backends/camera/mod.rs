// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! ```text
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← Readiness state machine, settings, PNG capture
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraBackend Trait│  ← Common interface
//! └──────────┬──────────┘
//!            │
//!      ┌─────┴──────┐
//!      ▼            ▼
//!  ┌──────┐   ┌───────────┐
//!  │ V4L2 │   │ Synthetic │
//!  └──────┘   └───────────┘
//! ```

pub mod format_converters;
pub mod synthetic;
pub mod types;
pub mod v4l2;
pub mod v4l2_controls;
pub mod v4l2_utils;

pub use synthetic::{SyntheticBackend, SyntheticCameraConfig, SyntheticProbe};
pub use types::*;
pub use v4l2::V4l2Backend;

/// Resolves once the opened stream delivers its first frame, carrying the
/// resolution the hardware actually negotiated
pub type PlayingSignal = tokio::sync::oneshot::Receiver<Resolution>;

/// Camera backend trait
///
/// Backends are synchronous; the capture session owns exactly one and
/// serialises access to it. Implementations must release any previously
/// opened stream inside [`CameraBackend::open`] before acquiring a new one.
pub trait CameraBackend: Send {
    // ===== Enumeration =====

    /// Enumerate available cameras on this backend
    fn enumerate_cameras(&self) -> Vec<CaptureDevice>;

    /// Distinct frame sizes offered by a device, largest first
    fn get_resolutions(&self, device: &CaptureDevice) -> Vec<Resolution>;

    // ===== Lifecycle =====

    /// Open the device and start streaming
    ///
    /// Returning `Ok` means the device is opened, not that it is playing:
    /// settings written before the returned signal fires may be ignored by
    /// the hardware.
    ///
    /// # Arguments
    /// * `device` - The camera device to open
    /// * `resolution` - Requested frame size; `None` picks the largest
    fn open(
        &mut self,
        device: &CaptureDevice,
        resolution: Option<Resolution>,
    ) -> BackendResult<PlayingSignal>;

    /// Release the stream and all device handles. Idempotent.
    fn close(&mut self);

    /// Check if a stream is currently open
    fn is_open(&self) -> bool;

    // ===== Controls =====

    /// Controls supported by the open device (empty when closed)
    fn capabilities(&self) -> Capabilities;

    /// Write a single control
    fn apply_control(&mut self, value: ControlValue) -> BackendResult<()>;

    // ===== Frames =====

    /// Most recent frame of the open stream
    fn latest_frame(&self) -> Option<CameraFrame>;

    // ===== Metadata =====

    /// Get the backend type identifier
    fn backend_type(&self) -> CameraBackendType;
}

/// Get a backend instance for the given type
pub fn get_backend_for_type(backend_type: CameraBackendType) -> Box<dyn CameraBackend> {
    match backend_type {
        CameraBackendType::V4l2 => Box::new(V4l2Backend::new()),
        CameraBackendType::Synthetic => Box::new(SyntheticBackend::default()),
    }
}
