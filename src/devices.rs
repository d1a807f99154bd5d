// SPDX-License-Identifier: GPL-3.0-only

//! Device enumeration and selection
//!
//! Wraps the session's backend inventory with the label denylist and keeps
//! the operator's device/resolution choice. Every selection re-acquires the
//! session; the previous device is released before the new one is opened.

use crate::backends::camera::{CaptureDevice, Resolution};
use crate::config::PersistedSettings;
use crate::session::{CaptureSession, SessionError, SessionResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Whether `label` matches any denylist entry (case-insensitive substring)
pub fn is_denied(label: &str, denylist: &[String]) -> bool {
    let label = label.to_lowercase();
    denylist
        .iter()
        .any(|entry| !entry.is_empty() && label.contains(&entry.to_lowercase()))
}

/// Clears the loading flag when a selection finishes or is dropped
struct LoadingGuard(Arc<AtomicBool>);

impl LoadingGuard {
    fn start(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DeviceSelector {
    session: CaptureSession,
    denylist: Vec<String>,
    devices: Vec<CaptureDevice>,
    selected: Option<CaptureDevice>,
    resolution: Option<Resolution>,
    loading: Arc<AtomicBool>,
}

impl DeviceSelector {
    pub fn new(session: CaptureSession, denylist: Vec<String>) -> Self {
        Self {
            session,
            denylist,
            devices: Vec::new(),
            selected: None,
            resolution: None,
            loading: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Query the inventory, dropping denied devices
    pub fn list_devices(&self) -> Vec<CaptureDevice> {
        let all = self.session.enumerate_cameras();
        let total = all.len();
        let devices: Vec<_> = all
            .into_iter()
            .filter(|device| {
                let denied = is_denied(&device.label, &self.denylist);
                if denied {
                    debug!(device = %device, "Skipping denylisted device");
                }
                !denied
            })
            .collect();

        debug!(total, usable = devices.len(), "Enumerated capture devices");
        devices
    }

    /// Distinct resolutions of `device`, largest first
    pub fn list_resolutions(&self, device: &CaptureDevice) -> Vec<Resolution> {
        let mut resolutions = self.session.get_resolutions(device);
        resolutions.sort_by(|a, b| {
            b.pixel_count()
                .cmp(&a.pixel_count())
                .then(b.width.cmp(&a.width))
        });
        resolutions.dedup();
        resolutions
    }

    /// Devices seen by the last refresh
    pub fn devices(&self) -> &[CaptureDevice] {
        &self.devices
    }

    pub fn selected_device(&self) -> Option<&CaptureDevice> {
        self.selected.as_ref()
    }

    pub fn selected_resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// True while a selection is re-acquiring the session
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Shared view of the loading flag
    pub fn loading_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.loading)
    }

    /// Re-enumerate
    ///
    /// If the selected device disappeared, the first remaining device is
    /// selected instead; with none left the session is torn down.
    pub async fn refresh(&mut self) -> SessionResult<()> {
        self.devices = self.list_devices();

        let Some(selected) = self.selected.clone() else {
            return Ok(());
        };
        if self.devices.iter().any(|d| d.id == selected.id) {
            return Ok(());
        }

        warn!(device = %selected, "Selected device disappeared");
        match self.devices.first().cloned() {
            Some(fallback) => self.select_device(&fallback).await.map(|_| ()),
            None => {
                self.session.release().await;
                self.selected = None;
                self.resolution = None;
                Err(SessionError::DeviceUnavailable(
                    "no capture devices left".to_string(),
                ))
            }
        }
    }

    /// Select a device and re-acquire the session
    ///
    /// The previous resolution is kept if the new device offers it.
    pub async fn select_device(&mut self, device: &CaptureDevice) -> SessionResult<Resolution> {
        let _loading = LoadingGuard::start(&self.loading);
        info!(device = %device, "Selecting camera");

        self.session.release().await;
        self.selected = Some(device.clone());

        let offered = self.list_resolutions(device);
        let requested = self
            .resolution
            .filter(|r| offered.contains(r))
            .or_else(|| offered.first().copied());
        self.resolution = requested;

        self.session.setup(device, requested).await
    }

    /// Change the resolution of the selected device
    pub async fn select_resolution(&mut self, resolution: Resolution) -> SessionResult<Resolution> {
        let device = self.selected.clone().ok_or_else(|| {
            SessionError::DeviceUnavailable("no device selected".to_string())
        })?;
        let _loading = LoadingGuard::start(&self.loading);
        info!(device = %device, %resolution, "Selecting resolution");

        self.session.release().await;
        self.resolution = Some(resolution);
        self.session.setup(&device, Some(resolution)).await
    }

    /// Refresh and select the persisted device, or the first one
    pub async fn restore(&mut self, persisted: &PersistedSettings) -> SessionResult<Resolution> {
        self.devices = self.list_devices();
        self.resolution = persisted.last_resolution;

        let device = persisted
            .last_device_id
            .as_ref()
            .and_then(|id| self.devices.iter().find(|d| &d.id == id))
            .or_else(|| self.devices.first())
            .cloned()
            .ok_or_else(|| SessionError::DeviceUnavailable("no capture devices found".to_string()))?;

        self.select_device(&device).await
    }

    /// Record the current choice for the next run
    pub fn persist(&self, persisted: &mut PersistedSettings) {
        persisted.last_device_id = self.selected.as_ref().map(|d| d.id.clone());
        persisted.last_resolution = self.resolution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{SyntheticBackend, SyntheticCameraConfig, SyntheticProbe};
    use crate::session::SessionOptions;

    fn device(id: &str, label: &str) -> CaptureDevice {
        CaptureDevice {
            id: id.to_string(),
            label: label.to_string(),
            driver: None,
        }
    }

    fn denylist() -> Vec<String> {
        crate::constants::devices::LABEL_DENYLIST
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn selector(devices: Vec<CaptureDevice>) -> (DeviceSelector, SyntheticProbe) {
        let backend = SyntheticBackend::new(SyntheticCameraConfig {
            devices,
            resolutions: vec![
                Resolution::new(320, 240),
                Resolution::new(1280, 720),
                Resolution::new(640, 480),
            ],
            ..Default::default()
        });
        let probe = backend.probe();
        let session = CaptureSession::new(Box::new(backend), SessionOptions::default());
        (DeviceSelector::new(session, denylist()), probe)
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        let list = denylist();
        assert!(is_denied("OBS Virtual Camera", &list));
        assert!(is_denied("Dummy video device (v4l2LOOPBACK)", &list));
        assert!(is_denied("my virtual cam", &list));
        assert!(!is_denied("Logitech BRIO", &list));
    }

    #[test]
    fn test_list_devices_filters_virtual() {
        let (selector, _) = selector(vec![
            device("/dev/video0", "Integrated Camera"),
            device("/dev/video4", "OBS Virtual Camera"),
        ]);
        let devices = selector.list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "/dev/video0");
    }

    #[test]
    fn test_resolutions_largest_first() {
        let (selector, _) = selector(vec![device("/dev/video0", "Integrated Camera")]);
        let list = selector.list_resolutions(&device("/dev/video0", "Integrated Camera"));
        assert_eq!(list[0], Resolution::new(1280, 720));
        assert_eq!(list[2], Resolution::new(320, 240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_devices_never_holds_two() {
        let first = device("/dev/video0", "Integrated Camera");
        let second = device("/dev/video2", "USB Camera");
        let (mut selector, probe) = selector(vec![first.clone(), second.clone()]);

        selector.select_device(&first).await.unwrap();
        selector.select_device(&second).await.unwrap();
        selector
            .select_resolution(Resolution::new(640, 480))
            .await
            .unwrap();

        assert_eq!(probe.opens(), 3);
        assert_eq!(probe.max_simultaneous_open(), 1);
        assert!(!selector.is_loading());
        assert_eq!(
            selector.session().current_device().map(|d| d.id),
            Some(second.id)
        );
        assert_eq!(
            selector.session().requested_resolution(),
            Some(Resolution::new(640, 480))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_prefers_persisted_device() {
        let (mut selector, _) = selector(vec![
            device("/dev/video0", "Integrated Camera"),
            device("/dev/video2", "USB Camera"),
        ]);
        let persisted = PersistedSettings {
            last_device_id: Some("/dev/video2".to_string()),
            last_resolution: Some(Resolution::new(640, 480)),
            ..Default::default()
        };

        let active = selector.restore(&persisted).await.unwrap();
        assert_eq!(active, Resolution::new(640, 480));
        assert_eq!(selector.selected_device().map(|d| d.id.as_str()), Some("/dev/video2"));

        let mut saved = PersistedSettings::default();
        selector.persist(&mut saved);
        assert_eq!(saved.last_device_id.as_deref(), Some("/dev/video2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_resolution_without_device() {
        let (mut selector, _) = selector(vec![device("/dev/video0", "Integrated Camera")]);
        let result = selector.select_resolution(Resolution::new(640, 480)).await;
        assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
        assert!(!selector.is_loading());
    }
}
