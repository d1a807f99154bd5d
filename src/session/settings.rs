// SPDX-License-Identifier: GPL-3.0-only

//! Camera settings and capability filtering
//!
//! [`CameraSettings`] is a partial description: every field is optional
//! and only fields backed by a supported control are ever written to the
//! device. Unsupported fields are dropped without error.

use crate::backends::camera::{Capabilities, ControlKind, ControlValue};
use serde::{Deserialize, Serialize};

/// Exposure control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    Auto,
    Manual,
}

/// Focus control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
    Auto,
    Manual,
    Continuous,
}

impl FocusMode {
    /// V4L2 only distinguishes on/off autofocus
    pub fn is_automatic(self) -> bool {
        matches!(self, FocusMode::Auto | FocusMode::Continuous)
    }
}

/// Requested camera settings
///
/// Values are in device units (V4L2: exposure time in 100µs steps,
/// compensation in 0.001 EV).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_mode: Option<ExposureMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_compensation: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_mode: Option<FocusMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_distance: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<i32>,
}

impl CameraSettings {
    /// Automatic exposure without bias
    pub fn neutral() -> Self {
        Self {
            exposure_mode: Some(ExposureMode::Auto),
            exposure_compensation: Some(0),
            ..Default::default()
        }
    }

    /// Everything automatic, used for the first comparison pass
    pub fn automatic() -> Self {
        Self {
            exposure_mode: Some(ExposureMode::Auto),
            exposure_compensation: Some(0),
            focus_mode: Some(FocusMode::Continuous),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fields of `self` override those of `base`
    pub fn merged_over(&self, base: &CameraSettings) -> CameraSettings {
        CameraSettings {
            exposure_mode: self.exposure_mode.or(base.exposure_mode),
            exposure_time: self.exposure_time.or(base.exposure_time),
            exposure_compensation: self.exposure_compensation.or(base.exposure_compensation),
            focus_mode: self.focus_mode.or(base.focus_mode),
            focus_distance: self.focus_distance.or(base.focus_distance),
            brightness: self.brightness.or(base.brightness),
            contrast: self.contrast.or(base.contrast),
        }
    }

    /// Keep only the fields the device can apply, clamped into range
    pub fn effective_for(&self, caps: &Capabilities) -> CameraSettings {
        let int = |value: Option<i32>, kind: ControlKind| {
            let range = caps.range(kind)?;
            value.map(|v| range.clamp(v))
        };
        let flag = |supported: bool| supported.then_some(());

        CameraSettings {
            exposure_mode: flag(caps.supports(ControlKind::ExposureMode))
                .and(self.exposure_mode),
            exposure_time: int(self.exposure_time, ControlKind::ExposureTime),
            exposure_compensation: int(
                self.exposure_compensation,
                ControlKind::ExposureCompensation,
            ),
            focus_mode: flag(caps.supports(ControlKind::FocusMode)).and(self.focus_mode),
            focus_distance: int(self.focus_distance, ControlKind::FocusDistance),
            brightness: int(self.brightness, ControlKind::Brightness),
            contrast: int(self.contrast, ControlKind::Contrast),
        }
    }

    /// Control writes in application order
    ///
    /// Modes come before the values they unlock: absolute exposure and
    /// focus are ignored by most drivers while the automatic mode is on.
    pub fn to_controls(&self) -> Vec<ControlValue> {
        let mut controls = Vec::new();
        if let Some(mode) = self.exposure_mode {
            controls.push(ControlValue::ExposureAuto(mode == ExposureMode::Auto));
        }
        if let Some(time) = self.exposure_time {
            controls.push(ControlValue::ExposureTime(time));
        }
        if let Some(bias) = self.exposure_compensation {
            controls.push(ControlValue::ExposureCompensation(bias));
        }
        if let Some(mode) = self.focus_mode {
            controls.push(ControlValue::FocusAuto(mode.is_automatic()));
        }
        if let Some(distance) = self.focus_distance {
            controls.push(ControlValue::FocusDistance(distance));
        }
        if let Some(brightness) = self.brightness {
            controls.push(ControlValue::Brightness(brightness));
        }
        if let Some(contrast) = self.contrast {
            controls.push(ControlValue::Contrast(contrast));
        }
        controls
    }
}
