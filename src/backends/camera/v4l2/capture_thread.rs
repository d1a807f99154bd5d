// SPDX-License-Identifier: GPL-3.0-only

//! Streaming thread for the V4L2 backend

use crate::backends::camera::types::{CameraFrame, PixelFormat, Resolution};
use crate::constants::pipeline;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;

/// Upper bound on a blocking dequeue so stop requests are noticed
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(pipeline::DEQUEUE_TIMEOUT_MS);

pub(super) struct CaptureThread {
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<CameraFrame>>>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    /// Start streaming from an already configured device
    ///
    /// The returned receiver resolves with the negotiated resolution once
    /// the first frame has been dequeued, i.e. once the stream is playing.
    pub(super) fn spawn(
        dev: Device,
        size: Resolution,
        format: PixelFormat,
        stride: u32,
    ) -> (Self, oneshot::Receiver<Resolution>) {
        let running = Arc::new(AtomicBool::new(true));
        let latest = Arc::new(Mutex::new(None));
        let (playing_tx, playing_rx) = oneshot::channel();

        let thread_running = Arc::clone(&running);
        let thread_latest = Arc::clone(&latest);
        let handle = std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                if let Err(e) = capture_loop(
                    dev,
                    size,
                    format,
                    stride,
                    thread_running,
                    thread_latest,
                    playing_tx,
                ) {
                    error!(error = %e, "V4L2 capture loop failed");
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Dropped sender makes the session's ready wait fail
                error!(error = %e, "Failed to spawn capture thread");
                None
            }
        };

        (
            Self {
                running,
                latest,
                handle,
            },
            playing_rx,
        )
    }

    pub(super) fn latest(&self) -> Option<CameraFrame> {
        self.latest.lock().ok()?.clone()
    }

    /// Stop streaming and wait for the thread to release the device
    pub(super) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Capture thread panicked");
        }
        if let Ok(mut latest) = self.latest.lock() {
            *latest = None;
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    dev: Device,
    size: Resolution,
    format: PixelFormat,
    stride: u32,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<CameraFrame>>>,
    playing: oneshot::Sender<Resolution>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut stream = MmapStream::with_buffers(&dev, Type::VideoCapture, pipeline::MMAP_BUFFERS)
        .map_err(|e| format!("Failed to create buffer stream: {}", e))?;
    stream.set_timeout(DEQUEUE_TIMEOUT);

    info!(%size, ?format, "V4L2 capture stream started");

    let mut playing = Some(playing);

    while running.load(Ordering::SeqCst) {
        match stream.next() {
            Ok((buf, meta)) => {
                let frame_num = FRAME_COUNTER.fetch_add(1, Ordering::Relaxed);
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };

                let frame = CameraFrame {
                    width: size.width,
                    height: size.height,
                    data: Arc::from(&buf[..used]),
                    format,
                    stride,
                    captured_at: Instant::now(),
                };

                if let Ok(mut slot) = latest.lock() {
                    *slot = Some(frame);
                }

                if let Some(tx) = playing.take() {
                    info!(%size, "V4L2 stream playing");
                    let _ = tx.send(size);
                }

                if frame_num % 120 == 0 {
                    debug!(frame = frame_num, sequence = meta.sequence, bytes = used, "Frame dequeued");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!(error = %e, "Failed to dequeue frame");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    info!("V4L2 capture loop ended");
    Ok(())
}
