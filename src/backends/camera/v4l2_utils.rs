// SPDX-License-Identifier: GPL-3.0-only

//! Shared V4L2 utility functions
//!
//! Device discovery for the V4L2 backend: scans `/dev/video*`, queries each
//! node's capabilities and keeps only nodes that can actually capture video.

use super::types::CaptureDevice;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// VIDIOC_QUERYCAP ioctl number
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;

/// Device supports the single-planar video capture API
const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x00000001;
/// `device_caps` field is valid
const V4L2_CAP_DEVICE_CAPS: u32 = 0x80000000;

/// V4L2 capability structure for VIDIOC_QUERYCAP ioctl
#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

/// Identity of a V4L2 node as reported by QUERYCAP
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Bus location, shared by all nodes of one physical camera
    pub bus_info: String,
    /// Device path (e.g., /dev/video0)
    pub path: String,
    /// Whether this node delivers video frames (UVC also exposes metadata-only nodes)
    pub can_capture: bool,
}

fn query_v4l2_cap(fd: RawFd) -> Option<V4l2Capability> {
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4l2Capability) };
    if result < 0 { None } else { Some(cap) }
}

fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

/// Query card, driver and capture capability of a V4L2 node
pub fn query_device_info(device_path: &str) -> Option<DeviceInfo> {
    let file = std::fs::File::open(device_path).ok()?;
    let cap = query_v4l2_cap(file.as_raw_fd())?;

    let caps = if cap.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    };

    Some(DeviceInfo {
        card: c_string(&cap.card),
        driver: c_string(&cap.driver),
        bus_info: c_string(&cap.bus_info),
        path: device_path.to_string(),
        can_capture: caps & V4L2_CAP_VIDEO_CAPTURE != 0,
    })
}

/// Enumerate `/dev/video*` nodes that support video capture, sorted by path
pub fn enumerate_capture_nodes() -> Vec<CaptureDevice> {
    let mut paths: Vec<String> = std::fs::read_dir("/dev")
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.starts_with("video").then(|| format!("/dev/{}", name))
        })
        .collect();
    paths.sort_by_key(|p| natural_key(p));

    let mut devices = Vec::new();
    for path in paths {
        let Some(info) = query_device_info(&path) else {
            debug!(path = %path, "Skipping node without QUERYCAP");
            continue;
        };
        if !info.can_capture {
            debug!(path = %path, card = %info.card, "Skipping non-capture node");
            continue;
        }
        devices.push(CaptureDevice {
            id: info.path,
            label: info.card,
            driver: Some(info.driver),
        });
    }
    devices
}

/// Sort key so that /dev/video10 follows /dev/video9
fn natural_key(path: &str) -> (usize, String) {
    let digits: String = path.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    let number = digits.chars().rev().collect::<String>().parse().unwrap_or(usize::MAX);
    (number, path.to_string())
}
