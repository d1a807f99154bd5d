// SPDX-License-Identifier: GPL-3.0-only

//! Local storage of capture runs

use crate::constants::app_info;
use crate::sequencer::SequenceOutput;
use crate::upload::{LocalObjectStore, UploadState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

const MANIFEST_FILE: &str = "manifest.json";

/// Default folder for runs saved to disk (~/Pictures/panel-capture)
pub fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(app_info::APP_DIR)
}

/// Directory of one run: `{root}/{ppid}_{YYYYmmdd_HHMMSS}`
pub fn run_dir(root: &Path, ppid: &str, started: DateTime<Utc>) -> PathBuf {
    root.join(format!("{}_{}", ppid, started.format("%Y%m%d_%H%M%S")))
}

/// A run saved to disk: images below their object keys, manifest at the top
#[derive(Debug, Clone)]
pub struct RunDirectory {
    ppid: String,
    path: PathBuf,
}

impl RunDirectory {
    pub fn new(root: &Path, ppid: &str, started: DateTime<Utc>) -> Self {
        Self {
            ppid: ppid.to_string(),
            path: run_dir(root, ppid, started),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Object store writing this run's images
    pub fn store(&self) -> LocalObjectStore {
        LocalObjectStore::new(&self.path)
    }

    pub async fn write_manifest(
        &self,
        output: &SequenceOutput,
        uploads: &[UploadState],
    ) -> std::io::Result<PathBuf> {
        write_manifest(&self.path, &self.ppid, output, uploads).await
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    slot: usize,
    pass: &'a str,
    pattern: &'a str,
    width: u32,
    height: u32,
    captured_at: DateTime<Utc>,
    mean_luminance: f32,
    url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    ppid: &'a str,
    mode: String,
    version: &'a str,
    frames: Vec<ManifestEntry<'a>>,
}

/// Write `manifest.json` describing a finished run and its uploads
///
/// `uploads` is indexed by slot; missing entries are written as `null`.
pub async fn write_manifest(
    dir: &Path,
    ppid: &str,
    output: &SequenceOutput,
    uploads: &[UploadState],
) -> std::io::Result<PathBuf> {
    let frames = output
        .frames
        .iter()
        .map(|frame| ManifestEntry {
            slot: frame.slot,
            pass: frame.pass.name(),
            pattern: &frame.pattern,
            width: frame.width,
            height: frame.height,
            captured_at: frame.captured_at,
            mean_luminance: frame.mean_luminance,
            url: uploads.get(frame.slot).and_then(|s| s.url()),
        })
        .collect();
    let manifest = Manifest {
        ppid,
        mode: output.mode.to_string(),
        version: app_info::version(),
        frames,
    };

    let json = serde_json::to_vec_pretty(&manifest).map_err(std::io::Error::other)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(MANIFEST_FILE);
    tokio::fs::write(&path, json).await?;

    info!(path = %path.display(), frames = output.count(), "Run manifest written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{CaptureMode, CapturedFrame, PassKind, TestPattern};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn output_with_one_frame() -> SequenceOutput {
        SequenceOutput {
            mode: CaptureMode::Production,
            patterns: vec![TestPattern::named("white")],
            frames: vec![CapturedFrame {
                index: 0,
                pass: PassKind::Production,
                slot: 0,
                pattern: "white".to_string(),
                png: Arc::from(vec![0u8]),
                width: 4,
                height: 2,
                captured_at: Utc::now(),
                mean_luminance: 1.0,
            }],
        }
    }

    #[test]
    fn test_default_output_dir_is_app_folder() {
        assert!(default_output_dir().ends_with(app_info::APP_DIR));
    }

    #[test]
    fn test_run_dir_name() {
        let started = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            run_dir(Path::new("/tmp/out"), "PX-1", started),
            PathBuf::from("/tmp/out/PX-1_20260304_050607")
        );
    }

    #[tokio::test]
    async fn test_manifest_lists_urls_by_slot() {
        let dir = tempfile::tempdir().unwrap();
        let output = output_with_one_frame();

        let path = write_manifest(
            dir.path(),
            "PX-1",
            &output,
            &[UploadState::Uploaded("file:///x.png".to_string())],
        )
        .await
        .unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["mode"], "production");
        assert_eq!(json["frames"][0]["url"], "file:///x.png");
    }

    #[tokio::test]
    async fn test_run_directory_keeps_images_next_to_manifest() {
        use crate::upload::ObjectStore;

        let root = tempfile::tempdir().unwrap();
        let started = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let run = RunDirectory::new(root.path(), "PX-1", started);

        let url = run
            .store()
            .put("test-images/PX-1_white_1.png", Arc::from(vec![1u8, 2]))
            .await
            .unwrap();
        let manifest = run
            .write_manifest(&output_with_one_frame(), &[UploadState::Uploaded(url.clone())])
            .await
            .unwrap();

        let image = run.path().join("test-images").join("PX-1_white_1.png");
        assert!(image.exists());
        assert_eq!(url, format!("file://{}", image.display()));
        assert_eq!(manifest.parent(), Some(run.path()));
    }
}
