// SPDX-License-Identifier: GPL-3.0-only

//! Review of a finished capture run
//!
//! A [`ReviewSession`] covers the frames of one pass together with their
//! upload state. The operator approves it (creating the panel record),
//! requests a retake, or discards it.

use crate::api::{ApiClient, ApiError, ApiResult, CreatedPanel, PanelImage, PanelRecord};
use crate::sequencer::{CaptureMode, CapturedFrame, PassKind, SequenceOutput};
use crate::upload::{UploadLedger, UploadOutcome, UploadState};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What approval does with uploads that are not done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Refuse while any upload is pending or failed
    #[default]
    Block,
    /// Submit anyway, with null URLs for the missing images
    WarnAndAllow,
}

/// Receives approved panel records
pub trait PanelRecordSink: Send + Sync {
    fn create_panel<'a>(&'a self, record: &'a PanelRecord) -> BoxFuture<'a, ApiResult<CreatedPanel>>;
}

impl PanelRecordSink for ApiClient {
    fn create_panel<'a>(&'a self, record: &'a PanelRecord) -> BoxFuture<'a, ApiResult<CreatedPanel>> {
        Box::pin(ApiClient::create_panel(self, record))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Reviewing,
    Approved,
    RetakeRequested,
    Discarded,
}

impl ReviewState {
    /// Approved or discarded; the pass is never captured again
    pub fn is_settled(self) -> bool {
        matches!(self, ReviewState::Approved | ReviewState::Discarded)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Uploads still pending for slots {0:?}")]
    UploadsPending(Vec<usize>),
    #[error("Uploads failed for slots {0:?}")]
    UploadsFailed(Vec<usize>),
    #[error("Panel submission failed: {0}")]
    Submission(#[from] ApiError),
    #[error("Review already closed ({0:?})")]
    Closed(ReviewState),
}

/// Ask the sequencer to start over from the first pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetakeRequest {
    pub mode: CaptureMode,
    pub pass: PassKind,
}

pub struct ReviewSession {
    ppid: String,
    mode: CaptureMode,
    pass: PassKind,
    /// Global slot of the first frame
    first_slot: usize,
    frames: Vec<CapturedFrame>,
    ledger: UploadLedger,
    policy: ApprovalPolicy,
    state: ReviewState,
}

impl ReviewSession {
    /// One review per pass of `output`
    pub fn for_output(
        output: &SequenceOutput,
        ppid: &str,
        policy: ApprovalPolicy,
    ) -> Vec<ReviewSession> {
        output
            .passes()
            .into_iter()
            .map(|pass| {
                let frames = output.pass_frames(pass);
                let first_slot = frames.first().map(|f| f.slot).unwrap_or_default();
                ReviewSession {
                    ppid: ppid.to_string(),
                    mode: output.mode,
                    pass,
                    first_slot,
                    ledger: UploadLedger::new(frames.len()),
                    frames,
                    policy,
                    state: ReviewState::Reviewing,
                }
            })
            .collect()
    }

    pub fn pass(&self) -> PassKind {
        self.pass
    }

    pub fn state(&self) -> ReviewState {
        self.state
    }

    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }

    pub fn uploads(&self) -> &[UploadState] {
        self.ledger.states()
    }

    pub fn uploads_settled(&self) -> bool {
        self.ledger.is_settled()
    }

    /// Take an upload outcome if it belongs to this pass
    pub fn record(&mut self, outcome: &UploadOutcome) -> bool {
        let Some(local) = outcome.slot.checked_sub(self.first_slot) else {
            return false;
        };
        if local >= self.frames.len() {
            return false;
        }
        self.ledger.record(UploadOutcome {
            slot: local,
            ..outcome.clone()
        });
        true
    }

    /// Replace this pass's upload view with the matching slots of `ledger`
    pub fn sync_uploads(&mut self, ledger: &UploadLedger) {
        self.ledger = ledger.slice(self.first_slot, self.frames.len());
    }

    /// The record approval would submit, subject to the approval policy
    pub fn build_record(&self, defects: &[String]) -> Result<PanelRecord, ReviewError> {
        let pending: Vec<_> = self
            .ledger
            .pending_slots()
            .into_iter()
            .map(|i| i + self.first_slot)
            .collect();
        let failed: Vec<_> = self
            .ledger
            .failed_slots()
            .into_iter()
            .map(|i| i + self.first_slot)
            .collect();

        match self.policy {
            ApprovalPolicy::Block if !pending.is_empty() => {
                return Err(ReviewError::UploadsPending(pending));
            }
            ApprovalPolicy::Block if !failed.is_empty() => {
                return Err(ReviewError::UploadsFailed(failed));
            }
            ApprovalPolicy::WarnAndAllow if !pending.is_empty() || !failed.is_empty() => {
                warn!(?pending, ?failed, "Approving with missing image URLs");
            }
            _ => {}
        }

        let panel_images = self
            .frames
            .iter()
            .zip(self.ledger.states())
            .map(|(frame, state)| PanelImage {
                pattern_name: frame.upload_name(),
                image_url: state.url().map(str::to_string),
            })
            .collect();

        Ok(PanelRecord {
            ppid: self.ppid.clone(),
            panel_images,
            defects: defects.to_vec(),
            test_type: self.pass.name().to_string(),
        })
    }

    /// Submit the panel record
    ///
    /// On failure the review stays open so approval can be retried
    /// without recapturing.
    pub async fn approve(
        &mut self,
        sink: &dyn PanelRecordSink,
        defects: &[String],
    ) -> Result<CreatedPanel, ReviewError> {
        if self.state != ReviewState::Reviewing {
            return Err(ReviewError::Closed(self.state));
        }
        let record = self.build_record(defects)?;

        match sink.create_panel(&record).await {
            Ok(created) => {
                info!(ppid = %self.ppid, pass = %self.pass, "Panel record created");
                self.state = ReviewState::Approved;
                Ok(created)
            }
            Err(err) => {
                warn!(ppid = %self.ppid, error = %err, "Panel submission failed");
                Err(err.into())
            }
        }
    }

    /// Drop all frames and outcomes and ask for a new run
    pub fn retake(&mut self) -> RetakeRequest {
        info!(ppid = %self.ppid, pass = %self.pass, "Retake requested");
        self.frames.clear();
        self.ledger = UploadLedger::new(0);
        self.state = ReviewState::RetakeRequested;
        RetakeRequest {
            mode: self.mode,
            pass: self.pass,
        }
    }

    /// Abandon without any backend write
    pub fn discard(&mut self) {
        info!(ppid = %self.ppid, pass = %self.pass, "Review discarded");
        self.frames.clear();
        self.ledger = UploadLedger::new(0);
        self.state = ReviewState::Discarded;
    }
}

/// Passes whose review is closed for good
pub fn settled_passes(reviews: &[ReviewSession]) -> Vec<PassKind> {
    reviews
        .iter()
        .filter(|r| r.state().is_settled())
        .map(|r| r.pass())
        .collect()
}

/// Hand an outcome to whichever review owns its slot
pub fn route_outcome(reviews: &mut [ReviewSession], outcome: &UploadOutcome) -> bool {
    reviews.iter_mut().any(|review| review.record(outcome))
}
