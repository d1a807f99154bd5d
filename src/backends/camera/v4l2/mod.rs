// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera backend
//!
//! Opens a `/dev/video*` node with the `v4l` crate, negotiates a frame
//! format and runs a memory-mapped capture stream on a dedicated thread.
//! The thread keeps only the most recent frame; the session pulls from it
//! when a capture is requested.

mod capture_thread;

use super::types::*;
use super::{CameraBackend, PlayingSignal, v4l2_controls, v4l2_utils};
use capture_thread::CaptureThread;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use v4l::FourCC;
use v4l::prelude::*;
use v4l::video::Capture;

/// Pixel formats we can decode, in order of preference
const PREFERRED_FOURCCS: [&[u8; 4]; 2] = [b"MJPG", b"YUYV"];

/// Sizes offered for stepwise (continuous) frame size ranges
const STEPWISE_CANDIDATES: [(u32, u32); 6] = [
    (3840, 2160),
    (2560, 1440),
    (1920, 1080),
    (1280, 720),
    (800, 600),
    (640, 480),
];

/// Active stream state
struct ActiveStream {
    device: CaptureDevice,
    thread: CaptureThread,
}

/// V4L2 backend
pub struct V4l2Backend {
    active: Option<ActiveStream>,
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Sizes a node offers for one FourCC
    fn sizes_for(dev: &Device, fourcc: FourCC) -> Vec<Resolution> {
        let mut sizes = Vec::new();
        let Ok(frame_sizes) = dev.enum_framesizes(fourcc) else {
            return sizes;
        };
        for size in frame_sizes {
            match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                    sizes.push(Resolution::new(discrete.width, discrete.height));
                }
                v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                    for (w, h) in STEPWISE_CANDIDATES {
                        if w >= step.min_width
                            && w <= step.max_width
                            && h >= step.min_height
                            && h <= step.max_height
                        {
                            sizes.push(Resolution::new(w, h));
                        }
                    }
                }
            }
        }
        sizes
    }

    /// Pick the FourCC and size to request from the driver
    fn choose_format(dev: &Device, requested: Option<Resolution>) -> Option<(FourCC, Resolution)> {
        let offered: Vec<FourCC> = dev
            .enum_formats()
            .map(|formats| formats.into_iter().map(|f| f.fourcc).collect())
            .unwrap_or_default();

        let candidates: Vec<(FourCC, Vec<Resolution>)> = PREFERRED_FOURCCS
            .iter()
            .map(|repr| FourCC::new(repr))
            .filter(|fourcc| offered.contains(fourcc))
            .map(|fourcc| (fourcc, Self::sizes_for(dev, fourcc)))
            .collect();

        if let Some(requested) = requested {
            for (fourcc, sizes) in &candidates {
                if sizes.contains(&requested) {
                    return Some((*fourcc, requested));
                }
            }
            debug!(%requested, "Requested resolution not offered, using largest");
        }

        candidates
            .into_iter()
            .filter_map(|(fourcc, sizes)| {
                sizes
                    .into_iter()
                    .max_by_key(|r| r.pixel_count())
                    .map(|r| (fourcc, r))
            })
            .max_by_key(|(_, r)| r.pixel_count())
    }
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for V4l2Backend {
    fn enumerate_cameras(&self) -> Vec<CaptureDevice> {
        let devices = v4l2_utils::enumerate_capture_nodes();
        info!(count = devices.len(), "Enumerated V4L2 capture devices");
        devices
    }

    fn get_resolutions(&self, device: &CaptureDevice) -> Vec<Resolution> {
        let Ok(dev) = Device::with_path(&device.id) else {
            return Vec::new();
        };
        let offered: Vec<FourCC> = dev
            .enum_formats()
            .map(|formats| formats.into_iter().map(|f| f.fourcc).collect())
            .unwrap_or_default();

        let mut unique = BTreeSet::new();
        for repr in PREFERRED_FOURCCS {
            let fourcc = FourCC::new(repr);
            if offered.contains(&fourcc) {
                for size in Self::sizes_for(&dev, fourcc) {
                    unique.insert((size.pixel_count(), size.width, size.height));
                }
            }
        }

        unique
            .into_iter()
            .rev()
            .map(|(_, w, h)| Resolution::new(w, h))
            .collect()
    }

    fn open(
        &mut self,
        device: &CaptureDevice,
        resolution: Option<Resolution>,
    ) -> BackendResult<PlayingSignal> {
        // Never hold two device handles
        self.close();

        let dev = Device::with_path(&device.id).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                BackendError::PermissionDenied(format!("{}: {}", device.id, e))
            }
            std::io::ErrorKind::NotFound => BackendError::DeviceNotFound(device.id.clone()),
            _ => BackendError::InitializationFailed(format!("{}: {}", device.id, e)),
        })?;

        let (fourcc, size) = Self::choose_format(&dev, resolution).ok_or_else(|| {
            BackendError::InitializationFailed(format!(
                "{} offers no MJPG or YUYV formats",
                device.id
            ))
        })?;

        let mut format = dev
            .format()
            .map_err(|e| BackendError::InitializationFailed(format!("query format: {}", e)))?;
        format.width = size.width;
        format.height = size.height;
        format.fourcc = fourcc;

        let negotiated = dev
            .set_format(&format)
            .map_err(|e| BackendError::InitializationFailed(format!("set format: {}", e)))?;

        if negotiated.width != size.width || negotiated.height != size.height {
            warn!(
                requested = %size,
                width = negotiated.width,
                height = negotiated.height,
                "Driver negotiated a different resolution"
            );
        }

        let pixel_format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            BackendError::InitializationFailed(format!(
                "driver switched to unsupported format {}",
                negotiated.fourcc
            ))
        })?;

        info!(
            device = %device,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = %negotiated.fourcc,
            "V4L2 device opened"
        );

        let (thread, playing) = CaptureThread::spawn(
            dev,
            Resolution::new(negotiated.width, negotiated.height),
            pixel_format,
            negotiated.stride,
        );

        self.active = Some(ActiveStream {
            device: device.clone(),
            thread,
        });

        Ok(playing)
    }

    fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!(device = %active.device, "Releasing V4L2 device");
            active.thread.stop();
        }
    }

    fn is_open(&self) -> bool {
        self.active.is_some()
    }

    fn capabilities(&self) -> Capabilities {
        match &self.active {
            Some(active) => v4l2_controls::query_capabilities(&active.device.id),
            None => Capabilities::new(),
        }
    }

    fn apply_control(&mut self, value: ControlValue) -> BackendResult<()> {
        let active = self.active.as_ref().ok_or(BackendError::NotStreaming)?;
        let (id, raw) = v4l2_controls::raw_control(&active.device.id, value);
        v4l2_controls::set_control(&active.device.id, id, raw).map_err(|reason| {
            BackendError::ControlRejected {
                kind: value.kind(),
                reason,
            }
        })
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        self.active.as_ref()?.thread.latest()
    }

    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::V4l2
    }
}

impl Drop for V4l2Backend {
    fn drop(&mut self) {
        self.close();
    }
}
