// SPDX-License-Identifier: GPL-3.0-only

//! Capture session
//!
//! Owns the single live stream of the application and the readiness state
//! machine around it:
//!
//! ```text
//! Uninitialized ──setup──▶ Acquiring ──playing──▶ Ready
//!       ▲                      │                    │
//!       └──────failure─────────┴──────teardown──────┘
//! ```
//!
//! Every transition into `Acquiring` and every teardown advances the session
//! epoch. Timers started by callers are bound to the epoch they observed
//! through a [`SessionLease`], so a teardown turns all of them into no-ops.

pub mod settings;

use crate::backends::camera::format_converters::frame_to_rgba;
use crate::backends::camera::{
    BackendError, CameraBackend, CameraBackendType, Capabilities, CaptureDevice, ControlKind,
    Resolution,
};
use crate::config::Config;
use crate::pipelines::photo::{EncodedFrame, average_luminance, encode_png};
use chrono::Utc;
pub use settings::{CameraSettings, ExposureMode, FocusMode};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Readiness phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    /// Device opened, waiting for the first frame
    Acquiring,
    /// Stream is playing and settings can be trusted
    Ready,
}

/// Phase plus the epoch it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub epoch: u64,
}

/// Session result type
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No usable device, permission denied, or the stream never started
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),
    /// A newer setup or a teardown replaced this acquisition
    #[error("Acquisition superseded")]
    Superseded,
    /// The session did not become ready in time
    #[error("Session not ready after {0:?}")]
    NotReady(Duration),
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        SessionError::DeviceUnavailable(err.to_string())
    }
}

/// Timing and baseline used by a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Wait after applying settings before they are trusted
    pub settle_delay: Duration,
    /// Upper bound between open and the first frame
    pub ready_timeout: Duration,
    /// Settings written once the stream plays
    pub baseline: CameraSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(crate::constants::timing::SETTLE_MS),
            ready_timeout: Duration::from_millis(crate::constants::timing::READY_TIMEOUT_MS),
            baseline: CameraSettings::neutral(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle_delay: config.timing.settle(),
            ready_timeout: config.timing.ready_timeout(),
            baseline: config
                .settings
                .baseline
                .merged_over(&CameraSettings::neutral()),
        }
    }
}

/// Handle bound to one session epoch
///
/// Cloning is cheap. Once the session is torn down or re-acquired the lease
/// is stale for good.
#[derive(Debug, Clone)]
pub struct SessionLease {
    epoch: u64,
    status: watch::Receiver<SessionStatus>,
}

impl SessionLease {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the session is still in the epoch this lease was taken in
    pub fn is_current(&self) -> bool {
        self.status.borrow().epoch == self.epoch
    }

    /// Resolves once the lease becomes stale
    pub async fn cancelled(&self) {
        let mut status = self.status.clone();
        let epoch = self.epoch;
        // A dropped session counts as cancelled
        let _ = status.wait_for(|s| s.epoch != epoch).await;
    }

    /// Sleep for `duration` unless the lease goes stale first
    ///
    /// Returns `true` if the lease is still current afterwards.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancelled() => {}
        }
        self.is_current()
    }
}

struct SessionState {
    backend: Box<dyn CameraBackend>,
    device: Option<CaptureDevice>,
    requested: Option<Resolution>,
    active: Option<Resolution>,
    /// RGBA raster reused by every capture
    raster: Vec<u8>,
}

/// The capture session
///
/// Thread-safe and cheap to clone; all clones drive the same stream.
#[derive(Clone)]
pub struct CaptureSession {
    state: Arc<Mutex<SessionState>>,
    status: Arc<watch::Sender<SessionStatus>>,
    options: Arc<SessionOptions>,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CameraBackend>, options: SessionOptions) -> Self {
        info!(backend = %backend.backend_type(), "Creating capture session");

        let state = SessionState {
            backend,
            device: None,
            requested: None,
            active: None,
            raster: Vec::new(),
        };
        let (status, _) = watch::channel(SessionStatus::default());

        Self {
            state: Arc::new(Mutex::new(state)),
            status: Arc::new(status),
            options: Arc::new(options),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `phase` in a fresh epoch
    fn advance(&self, phase: SessionPhase) -> u64 {
        let mut epoch = 0;
        self.status.send_modify(|s| {
            s.epoch += 1;
            s.phase = phase;
            epoch = s.epoch;
        });
        epoch
    }

    fn lease_for(&self, epoch: u64) -> SessionLease {
        SessionLease {
            epoch,
            status: self.status.subscribe(),
        }
    }

    // ===== Observation =====

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn phase(&self) -> SessionPhase {
        self.status().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == SessionPhase::Ready
    }

    /// Watch phase changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Lease on the current epoch
    pub fn lease(&self) -> SessionLease {
        self.lease_for(self.status().epoch)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn backend_type(&self) -> CameraBackendType {
        self.lock().backend.backend_type()
    }

    pub fn current_device(&self) -> Option<CaptureDevice> {
        self.lock().device.clone()
    }

    /// Resolution asked for in the last setup
    pub fn requested_resolution(&self) -> Option<Resolution> {
        self.lock().requested
    }

    /// Resolution the hardware actually delivers
    pub fn active_resolution(&self) -> Option<Resolution> {
        self.lock().active
    }

    pub fn capabilities(&self) -> Capabilities {
        self.lock().backend.capabilities()
    }

    // ===== Inventory =====

    pub fn enumerate_cameras(&self) -> Vec<CaptureDevice> {
        self.lock().backend.enumerate_cameras()
    }

    pub fn get_resolutions(&self, device: &CaptureDevice) -> Vec<Resolution> {
        self.lock().backend.get_resolutions(device)
    }

    // ===== Lifecycle =====

    /// Acquire `device` and wait until its stream plays
    ///
    /// Any previous acquisition is torn down first. Returns the negotiated
    /// resolution, which may differ from `resolution`.
    pub async fn setup(
        &self,
        device: &CaptureDevice,
        resolution: Option<Resolution>,
    ) -> SessionResult<Resolution> {
        if self.phase() != SessionPhase::Uninitialized {
            debug!("Setup while acquired, tearing down previous stream");
            self.release().await;
        }

        info!(device = %device, requested = ?resolution, "Acquiring camera");

        let (lease, playing) = {
            let mut state = self.lock();
            state.device = Some(device.clone());
            state.requested = resolution;
            state.active = None;
            let lease = self.lease_for(self.advance(SessionPhase::Acquiring));

            let opened = state.backend.open(device, resolution);
            match opened {
                Ok(playing) => (lease, playing),
                Err(err) => {
                    error!(device = %device, error = %err, "Failed to open camera");
                    state.backend.close();
                    state.device = None;
                    drop(state);
                    self.abandon(&lease);
                    return Err(err.into());
                }
            }
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.options.ready_timeout, playing) => Some(result),
            _ = lease.cancelled() => None,
        };
        if !lease.is_current() {
            debug!(epoch = lease.epoch(), "Acquisition superseded");
            return Err(SessionError::Superseded);
        }

        let negotiated = match outcome {
            Some(Ok(Ok(size))) => size,
            Some(Ok(Err(_))) => {
                self.fail_acquisition(&lease);
                return Err(SessionError::DeviceUnavailable(
                    "stream stopped before delivering a frame".to_string(),
                ));
            }
            Some(Err(_)) => {
                self.fail_acquisition(&lease);
                return Err(SessionError::DeviceUnavailable(format!(
                    "no frame within {:?}",
                    self.options.ready_timeout
                )));
            }
            None => return Err(SessionError::Superseded),
        };

        {
            let mut state = self.lock();
            if !lease.is_current() {
                return Err(SessionError::Superseded);
            }
            state.active = Some(negotiated);
            if resolution.is_some_and(|r| r != negotiated) {
                info!(requested = ?resolution, active = %negotiated, "Hardware negotiated a different resolution");
            }

            let caps = state.backend.capabilities();
            if caps.supports(ControlKind::ExposureMode)
                || caps.supports(ControlKind::ExposureCompensation)
            {
                let baseline = self.options.baseline.effective_for(&caps);
                for control in baseline.to_controls() {
                    if let Err(err) = state.backend.apply_control(control) {
                        warn!(?control, error = %err, "Failed to apply baseline control");
                    }
                }
            }

            self.status.send_modify(|s| s.phase = SessionPhase::Ready);
        }

        info!(active = %negotiated, epoch = lease.epoch(), "Capture session ready");
        Ok(negotiated)
    }

    /// Close the backend after a failed acquisition that is still ours
    fn fail_acquisition(&self, lease: &SessionLease) {
        let mut state = self.lock();
        if !lease.is_current() {
            return;
        }
        warn!("Camera did not start playing, releasing it");
        state.backend.close();
        state.device = None;
        state.active = None;
        drop(state);
        self.abandon(lease);
    }

    fn abandon(&self, lease: &SessionLease) {
        if lease.is_current() {
            self.advance(SessionPhase::Uninitialized);
        }
    }

    /// Release the stream
    ///
    /// Safe to call at any time, including before any setup. Every lease
    /// taken so far goes stale.
    pub fn teardown(&self) {
        let mut state = self.lock();
        let was_open = state.backend.is_open();
        state.backend.close();
        state.device = None;
        state.active = None;
        let previous = self.status().phase;
        self.advance(SessionPhase::Uninitialized);
        drop(state);

        if was_open || previous != SessionPhase::Uninitialized {
            info!(?previous, "Capture session torn down");
        }
    }

    /// [`teardown`](Self::teardown) on a blocking worker
    ///
    /// Closing a hardware stream joins its capture thread, so async callers
    /// release through here instead of stalling a runtime worker.
    pub async fn release(&self) {
        let session = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || session.teardown()).await {
            warn!(error = %e, "Teardown task failed");
        }
    }

    /// Wait for the Ready transition
    ///
    /// Returns a lease on the ready epoch.
    pub async fn wait_ready(&self, timeout: Duration) -> SessionResult<SessionLease> {
        let mut status = self.status.subscribe();
        let ready = tokio::time::timeout(
            timeout,
            status.wait_for(|s| s.phase == SessionPhase::Ready),
        )
        .await;

        match ready {
            Ok(Ok(status)) => {
                let epoch = status.epoch;
                drop(status);
                Ok(self.lease_for(epoch))
            }
            _ => Err(SessionError::NotReady(timeout)),
        }
    }

    // ===== Settings & capture =====

    /// Apply the supported subset of `settings`, then wait the settle delay
    ///
    /// Control failures are logged, never returned. Returns the settings
    /// actually written. The settle wait ends early on teardown.
    pub async fn adjust_settings(&self, settings: &CameraSettings) -> CameraSettings {
        let lease = self.lease();
        let effective = {
            let mut state = self.lock();
            if self.phase() != SessionPhase::Ready {
                debug!("Settings requested before session is ready");
                return CameraSettings::default();
            }

            let caps = state.backend.capabilities();
            let effective = settings.effective_for(&caps);
            if effective != *settings {
                debug!(requested = ?settings, ?effective, "Settings reduced to device capabilities");
            }
            for control in effective.to_controls() {
                if let Err(err) = state.backend.apply_control(control) {
                    warn!(?control, error = %err, "Failed to apply camera control");
                }
            }
            effective
        };

        if !lease.sleep(self.options.settle_delay).await {
            debug!("Settle delay interrupted by teardown");
        }
        effective
    }

    /// Snapshot the live stream as PNG
    ///
    /// `None` unless the session is Ready and a frame is available.
    pub fn capture_frame(&self) -> Option<EncodedFrame> {
        let mut state = self.lock();
        if self.phase() != SessionPhase::Ready {
            debug!("Capture requested before session is ready");
            return None;
        }

        let Some(frame) = state.backend.latest_frame() else {
            debug!("No frame available yet");
            return None;
        };

        let (width, height) = match frame_to_rgba(&frame, &mut state.raster) {
            Ok(size) => size,
            Err(err) => {
                warn!(error = %err, "Frame conversion failed");
                return None;
            }
        };
        let decoded = Resolution::new(width, height);
        if state.active != Some(decoded) {
            debug!(active = ?state.active, %decoded, "Frame size differs from negotiated size");
            state.active = Some(decoded);
        }

        let png = match encode_png(&state.raster, width, height) {
            Ok(png) => png,
            Err(err) => {
                warn!(error = %err, "Frame encoding failed");
                return None;
            }
        };
        let mean_luminance = average_luminance(&state.raster, width, height);

        Some(EncodedFrame {
            png: Arc::from(png),
            width,
            height,
            captured_at: Utc::now(),
            mean_luminance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{
        ControlRange, ControlValue, SyntheticBackend, SyntheticCameraConfig, SyntheticProbe,
    };

    fn session_with(config: SyntheticCameraConfig) -> (CaptureSession, SyntheticProbe, CaptureDevice) {
        let backend = SyntheticBackend::new(config);
        let probe = backend.probe();
        let device = backend.enumerate_cameras().remove(0);
        (
            CaptureSession::new(Box::new(backend), SessionOptions::default()),
            probe,
            device,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_reports_negotiated_resolution() {
        let (session, _, device) = session_with(SyntheticCameraConfig {
            negotiated_override: Some(Resolution::new(320, 240)),
            ..Default::default()
        });

        let active = session
            .setup(&device, Some(Resolution::new(640, 480)))
            .await
            .unwrap();

        assert_eq!(active, Resolution::new(320, 240));
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.requested_resolution(), Some(Resolution::new(640, 480)));
        assert_eq!(session.active_resolution(), Some(Resolution::new(320, 240)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_exposure_applied_when_supported() {
        let (session, probe, device) = session_with(SyntheticCameraConfig::default());
        session.setup(&device, None).await.unwrap();

        assert_eq!(
            probe.applied(),
            vec![
                ControlValue::ExposureAuto(true),
                ControlValue::ExposureCompensation(0)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_baseline_without_exposure_controls() {
        let (session, probe, device) = session_with(SyntheticCameraConfig {
            capabilities: Capabilities::new()
                .with(ControlKind::FocusMode, ControlRange::new(0, 1, 1, 1)),
            ..Default::default()
        });
        session.setup(&device, None).await.unwrap();
        assert!(probe.applied().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_is_device_unavailable() {
        let (session, _, device) = session_with(SyntheticCameraConfig {
            fail_open: true,
            ..Default::default()
        });

        let result = session.setup(&device, None).await;
        assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(session.current_device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_that_never_plays_times_out() {
        let (session, probe, device) = session_with(SyntheticCameraConfig {
            auto_play: false,
            ..Default::default()
        });

        let result = session.setup(&device, None).await;
        assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert_eq!(probe.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_supersedes_pending_setup() {
        let (session, probe, device) = session_with(SyntheticCameraConfig {
            auto_play: false,
            ..Default::default()
        });

        let pending = {
            let session = session.clone();
            let device = device.clone();
            tokio::spawn(async move { session.setup(&device, None).await })
        };
        let mut status = session.subscribe();
        status
            .wait_for(|s| s.phase == SessionPhase::Acquiring)
            .await
            .unwrap();

        session.teardown();
        assert!(!probe.start_playing());

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::Superseded)));
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_setup_releases_first_device() {
        let (session, probe, device) = session_with(SyntheticCameraConfig::default());
        session.setup(&device, None).await.unwrap();
        session
            .setup(&device, Some(Resolution::new(320, 240)))
            .await
            .unwrap();

        assert_eq!(probe.opens(), 2);
        assert_eq!(probe.max_simultaneous_open(), 1);
        assert_eq!(session.active_resolution(), Some(Resolution::new(320, 240)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent() {
        let (session, probe, device) = session_with(SyntheticCameraConfig::default());
        session.teardown();
        session.setup(&device, None).await.unwrap();
        session.teardown();
        session.teardown();

        assert_eq!(probe.closes(), 1);
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(session.capture_frame().is_none());
    }

    #[tokio::test]
    async fn test_release_closes_without_blocking_the_runtime() {
        let (session, probe, device) = session_with(SyntheticCameraConfig {
            close_latency: Duration::from_millis(200),
            ..Default::default()
        });
        session.setup(&device, None).await.unwrap();
        let stale = session.lease();

        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        session.release().await;
        ticker.abort();

        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 5);
        assert_eq!(probe.closes(), 1);
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(!stale.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_settings_drops_unsupported_exposure() {
        let (session, probe, device) = session_with(SyntheticCameraConfig {
            capabilities: Capabilities::new()
                .with(ControlKind::FocusDistance, ControlRange::new(0, 250, 5, 0)),
            ..Default::default()
        });
        session.setup(&device, None).await.unwrap();

        let effective = session
            .adjust_settings(&CameraSettings {
                exposure_mode: Some(ExposureMode::Manual),
                focus_distance: Some(50),
                ..Default::default()
            })
            .await;

        assert_eq!(effective.exposure_mode, None);
        assert_eq!(probe.applied(), vec![ControlValue::FocusDistance(50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_settings_waits_settle_delay() {
        let (session, _, device) = session_with(SyntheticCameraConfig::default());
        session.setup(&device, None).await.unwrap();

        let start = tokio::time::Instant::now();
        session.adjust_settings(&CameraSettings::neutral()).await;
        assert!(start.elapsed() >= session.options().settle_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_interrupts_settle_delay() {
        let (session, _, device) = session_with(SyntheticCameraConfig::default());
        session.setup(&device, None).await.unwrap();

        let lease = session.lease();
        let sleeper = tokio::spawn(async move { lease.sleep(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        session.teardown();

        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_frame_uses_active_size() {
        let (session, _, device) = session_with(SyntheticCameraConfig {
            negotiated_override: Some(Resolution::new(16, 8)),
            ..Default::default()
        });
        assert!(session.capture_frame().is_none());

        session.setup(&device, None).await.unwrap();
        let frame = session.capture_frame().unwrap();

        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(&frame.png[..8], b"\x89PNG\r\n\x1a\n");
        assert!((frame.mean_luminance - 128.0 / 255.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_returns_current_lease() {
        let (session, _, device) = session_with(SyntheticCameraConfig::default());
        assert!(matches!(
            session.wait_ready(Duration::from_millis(10)).await,
            Err(SessionError::NotReady(_))
        ));

        session.setup(&device, None).await.unwrap();
        let lease = session.wait_ready(Duration::from_millis(10)).await.unwrap();
        assert!(lease.is_current());
        session.teardown();
        assert!(!lease.is_current());
    }
}
