// SPDX-License-Identifier: GPL-3.0-only

//! Lossless photo encoding
//!
//! Captured frames are stored and uploaded as PNG. The encoder works on the
//! session's RGBA raster in place; nothing is copied before compression.

use chrono::{DateTime, Utc};
use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A captured frame in its canonical form
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// PNG bytes, shared read-only between upload and review
    pub png: Arc<[u8]>,
    /// Actual frame width (negotiated, not requested)
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    /// BT.601 luminance average in 0.0..=1.0
    pub mean_luminance: f32,
}

impl EncodedFrame {
    /// Milliseconds since the Unix epoch at capture time
    pub fn timestamp_millis(&self) -> i64 {
        self.captured_at.timestamp_millis()
    }
}

/// Encode a tightly packed RGBA raster as PNG
pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, String> {
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(format!(
            "raster size mismatch: {} bytes for {}x{}",
            rgba.len(),
            width,
            height
        ));
    }

    let mut buffer = Vec::new();
    PngEncoder::new_with_quality(&mut buffer, CompressionType::Default, FilterType::Adaptive)
        .write_image(rgba, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;

    debug!(width, height, size = buffer.len(), "PNG encoding complete");
    Ok(buffer)
}

/// Write an encoded frame to `dir/filename` on a blocking worker
pub async fn save_png(png: Arc<[u8]>, dir: &Path, filename: &str) -> Result<PathBuf, String> {
    let filepath = dir.join(filename);
    let target = filepath.clone();
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        std::fs::write(&target, &png[..]).map_err(|e| format!("Failed to save photo: {}", e))
    })
    .await
    .map_err(|e| format!("Save task error: {}", e))??;

    info!(path = %filepath.display(), "Photo saved");
    Ok(filepath)
}
