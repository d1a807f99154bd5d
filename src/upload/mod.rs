// SPDX-License-Identifier: GPL-3.0-only

//! Background upload of captured frames
//!
//! Each frame is uploaded on its own task the moment it is captured. The
//! sequencer never waits for an upload; outcomes arrive on a channel in
//! completion order and consumers index them by slot.

mod ledger;
mod store;

pub use ledger::{UploadLedger, UploadState};
pub use store::{HttpObjectStore, LocalObjectStore, ObjectStore};

use crate::config::Environment;
use crate::sequencer::{CapturedFrame, FrameSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Storage rejected {key} with HTTP {status}")]
    Status { status: u16, key: String },
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Local write failed: {0}")]
    Local(String),
}

/// Where uploads of one run go
///
/// Passed explicitly per run; there is no global test/production switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub environment: Environment,
    /// Panel identifier
    pub ppid: String,
}

impl UploadTarget {
    pub fn new(environment: Environment, ppid: impl Into<String>) -> Self {
        Self {
            environment,
            ppid: ppid.into(),
        }
    }

    /// `{prefix}/{ppid}_{pattern}_{timestamp_ms}.png`
    pub fn object_key(&self, pattern: &str, timestamp_ms: i64) -> String {
        format!(
            "{}/{}_{}_{}.png",
            self.environment.upload_prefix(),
            self.ppid,
            pattern,
            timestamp_ms
        )
    }

    pub fn key_for(&self, frame: &CapturedFrame) -> String {
        self.object_key(&frame.upload_name(), frame.timestamp_millis())
    }
}

/// Result of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub slot: usize,
    pub key: String,
    /// Public URL, `None` if the upload failed
    pub url: Option<String>,
}

/// Fire-and-forget uploader
#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    target: UploadTarget,
    outcomes: mpsc::UnboundedSender<UploadOutcome>,
    submitted: Arc<AtomicUsize>,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        target: UploadTarget,
    ) -> (Self, mpsc::UnboundedReceiver<UploadOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            store,
            target,
            outcomes: tx,
            submitted: Arc::new(AtomicUsize::new(0)),
        };
        (pipeline, rx)
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    /// Uploads started so far
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Start uploading `frame` on a new task
    ///
    /// Must be called from within a tokio runtime. The handle may be
    /// dropped; the outcome is delivered on the channel either way.
    pub fn submit(&self, frame: &CapturedFrame) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let outcomes = self.outcomes.clone();
        let key = self.target.key_for(frame);
        let slot = frame.slot;
        let png = Arc::clone(&frame.png);
        self.submitted.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let url = match store.put(&key, png).await {
                Ok(url) => {
                    info!(slot, %key, %url, store = store.name(), "Frame uploaded");
                    Some(url)
                }
                Err(err) => {
                    warn!(slot, %key, error = %err, "Frame upload failed");
                    None
                }
            };
            // Receiver gone means nobody reviews this run anymore
            let _ = outcomes.send(UploadOutcome { slot, key, url });
        })
    }
}

impl FrameSink for UploadPipeline {
    fn accept(&self, frame: &CapturedFrame) {
        self.submit(frame);
    }
}
