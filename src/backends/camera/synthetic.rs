// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic camera backend
//!
//! Produces flat RGBA frames without touching hardware. Used for dry runs
//! of the capture sequence (`--synthetic`) and throughout the test suite,
//! where a [`SyntheticProbe`] records what the session did to the device.

use super::types::*;
use super::{CameraBackend, PlayingSignal};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Behaviour of the fake device
#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    /// Devices reported by enumeration
    pub devices: Vec<CaptureDevice>,
    /// Sizes offered by every device, largest first
    pub resolutions: Vec<Resolution>,
    /// Forces the negotiated size regardless of the request
    pub negotiated_override: Option<Resolution>,
    /// Controls the device claims to support
    pub capabilities: Capabilities,
    /// Signal "playing" immediately on open; otherwise wait for [`SyntheticProbe::start_playing`]
    pub auto_play: bool,
    /// Reject every open with a permission error
    pub fail_open: bool,
    /// Deliver frames while open; `false` simulates a stream that stalls
    pub deliver_frames: bool,
    /// Time `close` blocks, like joining a hardware capture thread
    pub close_latency: Duration,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            devices: vec![CaptureDevice {
                id: "synthetic:0".to_string(),
                label: "Synthetic Panel Camera".to_string(),
                driver: Some("synthetic".to_string()),
            }],
            resolutions: vec![Resolution::new(640, 480), Resolution::new(320, 240)],
            negotiated_override: None,
            capabilities: full_capabilities(),
            auto_play: true,
            fail_open: false,
            deliver_frames: true,
            close_latency: Duration::ZERO,
        }
    }
}

/// Every control with UVC-like ranges
pub fn full_capabilities() -> Capabilities {
    Capabilities::new()
        .with(ControlKind::ExposureMode, ControlRange::new(0, 1, 1, 1))
        .with(ControlKind::ExposureTime, ControlRange::new(3, 2047, 1, 250))
        .with(ControlKind::ExposureCompensation, ControlRange::new(-2000, 2000, 1, 0))
        .with(ControlKind::FocusMode, ControlRange::new(0, 1, 1, 1))
        .with(ControlKind::FocusDistance, ControlRange::new(0, 250, 5, 0))
        .with(ControlKind::Brightness, ControlRange::new(-64, 64, 1, 0))
        .with(ControlKind::Contrast, ControlRange::new(0, 95, 1, 32))
}

#[derive(Debug, Default)]
struct ProbeState {
    applied: Vec<ControlValue>,
    opens: usize,
    closes: usize,
    open_now: usize,
    max_open: usize,
    pending_play: Option<(oneshot::Sender<Resolution>, Resolution)>,
}

/// Observation handle shared between a synthetic backend and a test
#[derive(Debug, Clone, Default)]
pub struct SyntheticProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl SyntheticProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Controls written to the device, in order
    pub fn applied(&self) -> Vec<ControlValue> {
        self.lock().applied.clone()
    }

    pub fn clear_applied(&self) {
        self.lock().applied.clear();
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Highest number of simultaneously open handles ever observed
    pub fn max_simultaneous_open(&self) -> usize {
        self.lock().max_open
    }

    /// Fire the pending "playing" signal of a device opened without auto play
    pub fn start_playing(&self) -> bool {
        match self.lock().pending_play.take() {
            Some((tx, size)) => tx.send(size).is_ok(),
            None => false,
        }
    }
}

/// Synthetic camera backend
pub struct SyntheticBackend {
    config: SyntheticCameraConfig,
    probe: SyntheticProbe,
    active: Option<Resolution>,
    brightness: i32,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        Self::with_probe(config, SyntheticProbe::default())
    }

    pub fn with_probe(config: SyntheticCameraConfig, probe: SyntheticProbe) -> Self {
        Self {
            config,
            probe,
            active: None,
            brightness: 0,
        }
    }

    pub fn probe(&self) -> SyntheticProbe {
        self.probe.clone()
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(SyntheticCameraConfig::default())
    }
}

impl CameraBackend for SyntheticBackend {
    fn enumerate_cameras(&self) -> Vec<CaptureDevice> {
        self.config.devices.clone()
    }

    fn get_resolutions(&self, device: &CaptureDevice) -> Vec<Resolution> {
        if self.config.devices.contains(device) {
            self.config.resolutions.clone()
        } else {
            Vec::new()
        }
    }

    fn open(
        &mut self,
        device: &CaptureDevice,
        resolution: Option<Resolution>,
    ) -> BackendResult<PlayingSignal> {
        self.close();

        if self.config.fail_open {
            return Err(BackendError::PermissionDenied(device.id.clone()));
        }
        if !self.config.devices.contains(device) {
            return Err(BackendError::DeviceNotFound(device.id.clone()));
        }

        let size = self
            .config
            .negotiated_override
            .or(resolution.filter(|r| self.config.resolutions.contains(r)))
            .or_else(|| self.config.resolutions.first().copied())
            .ok_or_else(|| BackendError::InitializationFailed("no resolutions".to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.probe.lock();
            state.opens += 1;
            state.open_now += 1;
            state.max_open = state.max_open.max(state.open_now);
            if self.config.auto_play {
                let _ = tx.send(size);
            } else {
                state.pending_play = Some((tx, size));
            }
        }

        info!(device = %device, %size, "Synthetic device opened");
        self.active = Some(size);
        Ok(rx)
    }

    fn close(&mut self) {
        if self.active.take().is_some() {
            if !self.config.close_latency.is_zero() {
                std::thread::sleep(self.config.close_latency);
            }
            let mut state = self.probe.lock();
            state.closes += 1;
            state.open_now = state.open_now.saturating_sub(1);
            state.pending_play = None;
            debug!("Synthetic device closed");
        }
    }

    fn is_open(&self) -> bool {
        self.active.is_some()
    }

    fn capabilities(&self) -> Capabilities {
        if self.active.is_some() {
            self.config.capabilities.clone()
        } else {
            Capabilities::new()
        }
    }

    fn apply_control(&mut self, value: ControlValue) -> BackendResult<()> {
        if self.active.is_none() {
            return Err(BackendError::NotStreaming);
        }
        if !self.config.capabilities.supports(value.kind()) {
            return Err(BackendError::ControlRejected {
                kind: value.kind(),
                reason: "unsupported".to_string(),
            });
        }
        if let ControlValue::Brightness(b) = value {
            self.brightness = b;
        }
        self.probe.lock().applied.push(value);
        Ok(())
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        let size = self.active.filter(|_| self.config.deliver_frames)?;
        let level = (128 + self.brightness).clamp(0, 255) as u8;
        let mut data = vec![level; size.width as usize * size.height as usize * 4];
        for alpha in data.iter_mut().skip(3).step_by(4) {
            *alpha = 255;
        }
        Some(CameraFrame {
            width: size.width,
            height: size.height,
            data: Arc::from(data),
            format: PixelFormat::RGBA,
            stride: size.width * 4,
            captured_at: Instant::now(),
        })
    }

    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Synthetic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_tracks_handles() {
        let mut backend = SyntheticBackend::default();
        let probe = backend.probe();
        let device = backend.enumerate_cameras().remove(0);

        backend.open(&device, None).unwrap();
        backend.open(&device, None).unwrap();
        assert_eq!(probe.opens(), 2);
        assert_eq!(probe.max_simultaneous_open(), 1);

        backend.close();
        backend.close();
        assert_eq!(probe.closes(), 2);
        assert!(!backend.is_open());
    }

    #[test]
    fn test_unsupported_control_is_rejected() {
        let config = SyntheticCameraConfig {
            capabilities: Capabilities::new()
                .with(ControlKind::FocusMode, ControlRange::new(0, 1, 1, 1)),
            ..Default::default()
        };
        let mut backend = SyntheticBackend::new(config);
        let device = backend.enumerate_cameras().remove(0);
        backend.open(&device, None).unwrap();

        assert!(backend.apply_control(ControlValue::FocusAuto(false)).is_ok());
        assert!(backend.apply_control(ControlValue::ExposureAuto(false)).is_err());
    }

    #[test]
    fn test_frame_uses_negotiated_size() {
        let config = SyntheticCameraConfig {
            negotiated_override: Some(Resolution::new(8, 6)),
            ..Default::default()
        };
        let mut backend = SyntheticBackend::new(config);
        let device = backend.enumerate_cameras().remove(0);
        backend.open(&device, Some(Resolution::new(640, 480))).unwrap();

        let frame = backend.latest_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.data.len(), 8 * 6 * 4);
    }
}
