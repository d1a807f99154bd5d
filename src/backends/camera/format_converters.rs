// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion into the shared RGBA raster
//!
//! Every converter writes into a caller-owned buffer so the capture session
//! can reuse one raster across captures instead of allocating per frame.

use super::types::{CameraFrame, PixelFormat};

/// Convert a raw frame to tightly packed RGBA in `raster`
///
/// The raster is resized to `width * height * 4` bytes; existing capacity
/// is reused. Returns the decoded dimensions, which for MJPEG come from the
/// JPEG header rather than the negotiated format.
pub fn frame_to_rgba(frame: &CameraFrame, raster: &mut Vec<u8>) -> Result<(u32, u32), String> {
    match frame.format {
        PixelFormat::RGBA => {
            rgba_strided_into(&frame.data, frame.width, frame.height, frame.stride, raster)?;
            Ok((frame.width, frame.height))
        }
        PixelFormat::YUYV => {
            yuyv_to_rgba_into(&frame.data, frame.width, frame.height, frame.stride, raster)?;
            Ok((frame.width, frame.height))
        }
        PixelFormat::MJPEG => mjpeg_to_rgba_into(&frame.data, raster),
    }
}

/// Copy RGBA rows, dropping any row padding
pub fn rgba_strided_into(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    raster: &mut Vec<u8>,
) -> Result<(), String> {
    let row = width as usize * 4;
    let stride = if stride == 0 { row } else { stride as usize };
    let needed = stride * (height as usize).saturating_sub(1) + row;
    if height > 0 && data.len() < needed {
        return Err(format!("RGBA frame too short: {} < {}", data.len(), needed));
    }

    raster.clear();
    raster.reserve(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        raster.extend_from_slice(&data[start..start + row]);
    }
    Ok(())
}

/// Convert YUYV (YUV 4:2:2) to RGBA
///
/// YUYV format: Y0 U Y1 V - each 4-byte group encodes 2 pixels.
/// Uses BT.601 coefficients for YUV to RGB conversion.
pub fn yuyv_to_rgba_into(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    raster: &mut Vec<u8>,
) -> Result<(), String> {
    let row_bytes = width as usize * 2;
    let stride = if stride == 0 { row_bytes } else { stride as usize };
    let needed = stride * (height as usize).saturating_sub(1) + row_bytes;
    if height > 0 && data.len() < needed {
        return Err(format!("YUYV frame too short: {} < {}", data.len(), needed));
    }

    raster.clear();
    raster.reserve(width as usize * height as usize * 4);

    for y in 0..height as usize {
        let line = &data[y * stride..y * stride + row_bytes];
        for chunk in line.chunks_exact(4) {
            let y0 = chunk[0] as f32;
            let u = chunk[1] as f32 - 128.0;
            let y1 = chunk[2] as f32;
            let v = chunk[3] as f32 - 128.0;

            for luma in [y0, y1] {
                let r = (luma + 1.402 * v).clamp(0.0, 255.0) as u8;
                let g = (luma - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
                let b = (luma + 1.772 * u).clamp(0.0, 255.0) as u8;
                raster.extend_from_slice(&[r, g, b, 255]);
            }
        }
    }

    Ok(())
}

/// Decode one MJPEG frame into RGBA
pub fn mjpeg_to_rgba_into(data: &[u8], raster: &mut Vec<u8>) -> Result<(u32, u32), String> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| format!("MJPEG decode failed: {}", e))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();

    raster.clear();
    raster.extend_from_slice(decoded.as_raw());
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_yuyv_gray_converts_to_gray() {
        // Two pixels, neutral chroma
        let data = [128u8, 128, 128, 128];
        let mut raster = Vec::new();
        yuyv_to_rgba_into(&data, 2, 1, 0, &mut raster).unwrap();
        assert_eq!(raster, vec![128, 128, 128, 255, 128, 128, 128, 255]);
    }

    #[test]
    fn test_yuyv_rejects_short_buffer() {
        let mut raster = Vec::new();
        assert!(yuyv_to_rgba_into(&[0u8; 3], 2, 1, 0, &mut raster).is_err());
    }

    #[test]
    fn test_rgba_stride_padding_is_dropped() {
        // 1x2 image with 4 bytes of padding per row
        let data = [1u8, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0];
        let mut raster = Vec::new();
        rgba_strided_into(&data, 1, 2, 8, &mut raster).unwrap();
        assert_eq!(raster, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_raster_capacity_is_reused() {
        let frame = CameraFrame {
            width: 4,
            height: 4,
            data: Arc::from(vec![200u8; 4 * 4 * 4]),
            format: PixelFormat::RGBA,
            stride: 16,
            captured_at: Instant::now(),
        };
        let mut raster = Vec::with_capacity(1024);
        let ptr = raster.as_ptr();
        frame_to_rgba(&frame, &mut raster).unwrap();
        frame_to_rgba(&frame, &mut raster).unwrap();
        assert_eq!(raster.len(), 64);
        assert_eq!(raster.as_ptr(), ptr);
    }

    #[test]
    fn test_mjpeg_garbage_is_an_error() {
        let mut raster = Vec::new();
        assert!(mjpeg_to_rgba_into(b"not a jpeg", &mut raster).is_err());
    }
}
