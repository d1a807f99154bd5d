// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera control interface
//!
//! Queries and sets the V4L2 controls behind [`ControlValue`]: exposure,
//! focus, brightness and contrast. Each call opens the device node briefly,
//! so control access never competes with the streaming file descriptor.

use super::types::{Capabilities, ControlKind, ControlRange, ControlValue};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

// ===== V4L2 Control IDs =====

/// Brightness control
pub const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
/// Contrast control
pub const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
/// Exposure mode: Auto, Manual, Shutter Priority, Aperture Priority
pub const V4L2_CID_EXPOSURE_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 1;
/// Absolute exposure time in 100µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 2;
/// Focus control (manual focus position)
pub const V4L2_CID_FOCUS_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 10;
/// Auto focus enable
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
/// Exposure compensation (EV bias) in 0.001 EV units
pub const V4L2_CID_AUTO_EXPOSURE_BIAS: u32 = V4L2_CID_CAMERA_CLASS_BASE + 19;

// ===== V4L2 Exposure Auto Menu Values =====

/// Automatic exposure time and iris
pub const V4L2_EXPOSURE_AUTO: i32 = 0;
/// Manual exposure time and iris
pub const V4L2_EXPOSURE_MANUAL: i32 = 1;
/// Auto exposure time, manual iris (what most UVC webcams call "auto")
pub const V4L2_EXPOSURE_APERTURE_PRIORITY: i32 = 3;

// ===== V4L2 Control Types =====
const V4L2_CTRL_TYPE_INTEGER: u32 = 1;
const V4L2_CTRL_TYPE_BOOLEAN: u32 = 2;
const V4L2_CTRL_TYPE_MENU: u32 = 3;
const V4L2_CTRL_TYPE_INTEGER_MENU: u32 = 9;

// ===== V4L2 Control Flags =====
const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

// ===== V4L2 ioctl Numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr

/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;
/// Query menu item (v4l2_querymenu: 44 bytes)
const VIDIOC_QUERYMENU: libc::c_ulong = 0xC02C5625;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

#[repr(C)]
#[repr(packed)]
struct V4l2Querymenu {
    id: u32,
    index: u32,
    name: [u8; 32],
    reserved: u32,
}

/// Information about a V4L2 control
#[derive(Debug, Clone)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub ctrl_type: ControlType,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
}

/// V4L2 control type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Integer,
    Boolean,
    Menu,
    IntegerMenu,
    Unknown(u32),
}

impl From<u32> for ControlType {
    fn from(value: u32) -> Self {
        match value {
            V4L2_CTRL_TYPE_INTEGER => ControlType::Integer,
            V4L2_CTRL_TYPE_BOOLEAN => ControlType::Boolean,
            V4L2_CTRL_TYPE_MENU => ControlType::Menu,
            V4L2_CTRL_TYPE_INTEGER_MENU => ControlType::IntegerMenu,
            other => ControlType::Unknown(other),
        }
    }
}

impl ControlInfo {
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    fn range(&self) -> ControlRange {
        ControlRange::new(self.minimum, self.maximum, self.step, self.default_value)
    }
}

fn extract_name(bytes: &[u8; 32]) -> String {
    let name_len = bytes.iter().position(|&c| c == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..name_len]).to_string()
}

/// V4L2 control id backing each control kind
pub fn control_id(kind: ControlKind) -> u32 {
    match kind {
        ControlKind::ExposureMode => V4L2_CID_EXPOSURE_AUTO,
        ControlKind::ExposureTime => V4L2_CID_EXPOSURE_ABSOLUTE,
        ControlKind::ExposureCompensation => V4L2_CID_AUTO_EXPOSURE_BIAS,
        ControlKind::FocusMode => V4L2_CID_FOCUS_AUTO,
        ControlKind::FocusDistance => V4L2_CID_FOCUS_ABSOLUTE,
        ControlKind::Brightness => V4L2_CID_BRIGHTNESS,
        ControlKind::Contrast => V4L2_CID_CONTRAST,
    }
}

/// Query if a control exists and get its information
pub fn query_control(device_path: &str, control_id: u32) -> Option<ControlInfo> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };

    if result < 0 {
        return None;
    }

    Some(ControlInfo {
        id: qctrl.id,
        name: extract_name(&qctrl.name),
        ctrl_type: qctrl.ctrl_type.into(),
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step,
        default_value: qctrl.default_value,
        flags: qctrl.flags,
    })
}

/// Set value of a control
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> Result<(), String> {
    let file = File::open(device_path).map_err(|e| format!("Failed to open device: {}", e))?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(
            device_path,
            control_id,
            value,
            ?errno,
            "Failed to set V4L2 control"
        );
        return Err(format!("Failed to set control: {}", errno));
    }

    if ctrl.value != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual = ctrl.value,
            "V4L2 control value was clamped"
        );
    }

    Ok(())
}

/// Indices of the menu entries a menu control accepts
pub fn query_menu_indices(device_path: &str, control_id: u32, max_index: i32) -> Vec<i32> {
    let file = match File::open(device_path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let fd = file.as_raw_fd();

    let mut indices = Vec::new();

    for index in 0..=max_index.max(0) {
        let mut qmenu = V4l2Querymenu {
            id: control_id,
            index: index as u32,
            name: [0; 32],
            reserved: 0,
        };

        let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYMENU, &mut qmenu as *mut V4l2Querymenu) };

        if result >= 0 {
            indices.push(index);
        }
    }

    indices
}

/// Build the capability set of a device from its V4L2 controls
pub fn query_capabilities(device_path: &str) -> Capabilities {
    let mut caps = Capabilities::new();

    for kind in ControlKind::ALL {
        let Some(info) = query_control(device_path, control_id(kind)) else {
            continue;
        };
        if info.is_disabled() {
            continue;
        }
        debug!(
            device_path,
            control = %info.name,
            ?kind,
            min = info.minimum,
            max = info.maximum,
            "Found V4L2 control"
        );
        caps.insert(kind, info.range());
    }

    caps
}

/// Menu value used for "auto" exposure on this device
///
/// UVC cameras rarely implement full auto; aperture priority is their
/// automatic mode.
fn auto_exposure_value(device_path: &str) -> i32 {
    let menu = query_menu_indices(
        device_path,
        V4L2_CID_EXPOSURE_AUTO,
        V4L2_EXPOSURE_APERTURE_PRIORITY,
    );
    if menu.contains(&V4L2_EXPOSURE_AUTO) || !menu.contains(&V4L2_EXPOSURE_APERTURE_PRIORITY) {
        V4L2_EXPOSURE_AUTO
    } else {
        V4L2_EXPOSURE_APERTURE_PRIORITY
    }
}

/// Translate a control write into the raw (id, value) pair for this device
pub fn raw_control(device_path: &str, value: ControlValue) -> (u32, i32) {
    let id = control_id(value.kind());
    let raw = match value {
        ControlValue::ExposureAuto(true) => auto_exposure_value(device_path),
        ControlValue::ExposureAuto(false) => V4L2_EXPOSURE_MANUAL,
        ControlValue::FocusAuto(on) => on as i32,
        ControlValue::ExposureTime(v)
        | ControlValue::ExposureCompensation(v)
        | ControlValue::FocusDistance(v)
        | ControlValue::Brightness(v)
        | ControlValue::Contrast(v) => v,
    };
    (id, raw)
}
