// SPDX-License-Identifier: GPL-3.0-only

//! Frame statistics

use tracing::warn;

/// Sample budget for luminance estimation
const MAX_SAMPLES: usize = 10_000;

/// Average BT.601 luminance of an RGBA raster in 0.0..=1.0
///
/// Samples every Nth pixel; exact averages are not needed to compare
/// exposure between passes.
pub fn average_luminance(rgba: &[u8], width: u32, height: u32) -> f32 {
    let pixels = (width as usize * height as usize).min(rgba.len() / 4);
    if pixels == 0 {
        warn!("Empty frame for luminance estimation");
        return 0.0;
    }

    let sample_stride = (pixels / MAX_SAMPLES).max(1);
    let mut total: f64 = 0.0;
    let mut samples = 0usize;

    for i in (0..pixels).step_by(sample_stride) {
        let idx = i * 4;
        let r = rgba[idx] as f64 / 255.0;
        let g = rgba[idx + 1] as f64 / 255.0;
        let b = rgba[idx + 2] as f64 / 255.0;
        total += 0.299 * r + 0.587 * g + 0.114 * b;
        samples += 1;
    }

    (total / samples as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_and_black() {
        assert!((average_luminance(&[255u8; 16], 2, 2) - 1.0).abs() < 1e-6);
        assert_eq!(average_luminance(&[0, 0, 0, 255, 0, 0, 0, 255], 2, 1), 0.0);
    }

    #[test]
    fn test_empty_frame() {
        assert_eq!(average_luminance(&[], 0, 0), 0.0);
    }

    #[test]
    fn test_primary_weights() {
        let red = [255u8, 0, 0, 255];
        assert!((average_luminance(&red, 1, 1) - 0.299).abs() < 1e-4);
    }
}
