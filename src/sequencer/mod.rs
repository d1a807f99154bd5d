// SPDX-License-Identifier: GPL-3.0-only

//! Pattern sequencer
//!
//! Drives one capture run: for every pass and every pattern it shows the
//! pattern, applies the pass profile, dwells, captures and hands the frame
//! to a [`FrameSink`] without waiting for it. All waits are bound to a
//! session lease, so a teardown ends the run with [`SequenceError::Cancelled`]
//! and nothing captured after it is recorded.

mod display;
mod plan;

pub use display::{ConsoleDisplay, PatternDisplay, RecordingDisplay};
pub use plan::{CaptureMode, PassKind, PassProfile, SequencePlan, TestPattern};

use crate::pipelines::photo::EncodedFrame;
use crate::session::{CaptureSession, SessionError, SessionLease};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A frame captured for one slot of the plan
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Pattern position within the pass
    pub index: usize,
    pub pass: PassKind,
    /// Position across all passes: `pass_index * patterns + index`
    pub slot: usize,
    pub pattern: String,
    pub png: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub mean_luminance: f32,
}

impl CapturedFrame {
    fn new(encoded: EncodedFrame, pattern: &TestPattern, pass: PassKind, index: usize, slot: usize) -> Self {
        Self {
            index,
            pass,
            slot,
            pattern: pattern.name.clone(),
            png: encoded.png,
            width: encoded.width,
            height: encoded.height,
            captured_at: encoded.captured_at,
            mean_luminance: encoded.mean_luminance,
        }
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.captured_at.timestamp_millis()
    }

    /// Pattern name qualified by the comparison pass it belongs to
    pub fn upload_name(&self) -> String {
        match self.pass {
            PassKind::Production => self.pattern.clone(),
            pass => format!("{}-{}", self.pattern, pass.name()),
        }
    }
}

/// Receives frames the moment they are captured
///
/// Must not block: the sequencer continues immediately.
pub trait FrameSink: Sync {
    fn accept(&self, frame: &CapturedFrame);
}

/// Discards frames
impl FrameSink for () {
    fn accept(&self, _frame: &CapturedFrame) {}
}

/// Progress of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEvent {
    PatternShown {
        pass: PassKind,
        index: usize,
        pattern: String,
    },
    FrameCaptured {
        pass: PassKind,
        index: usize,
        slot: usize,
    },
    PassChanged {
        from: PassKind,
        to: PassKind,
    },
    /// Sent once per run, after every slot is filled
    Completed { count: usize },
}

/// Frames of a finished run, in plan order
#[derive(Debug, Clone)]
pub struct SequenceOutput {
    pub mode: CaptureMode,
    pub patterns: Vec<TestPattern>,
    pub frames: Vec<CapturedFrame>,
}

impl SequenceOutput {
    pub fn count(&self) -> usize {
        self.frames.len()
    }

    /// Passes present in the run, in capture order
    pub fn passes(&self) -> Vec<PassKind> {
        let mut passes: Vec<PassKind> = Vec::new();
        for frame in &self.frames {
            if !passes.contains(&frame.pass) {
                passes.push(frame.pass);
            }
        }
        passes
    }

    /// Frames of one pass, in pattern order
    pub fn pass_frames(&self, pass: PassKind) -> Vec<CapturedFrame> {
        self.frames
            .iter()
            .filter(|f| f.pass == pass)
            .cloned()
            .collect()
    }
}

pub type SequenceResult<T> = Result<T, SequenceError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SequenceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("No test patterns or passes configured")]
    NoPatterns,
    /// The session was torn down during the run
    #[error("Capture run cancelled")]
    Cancelled,
    /// A slot produced no frame after every attempt
    #[error("No frame for slot {slot} after {attempts} attempts")]
    Stalled { slot: usize, attempts: u32 },
    /// Frame count does not match the plan
    #[error("Captured {actual} frames, expected {expected}")]
    CountMismatch { expected: usize, actual: usize },
}

pub struct PatternSequencer {
    session: CaptureSession,
    plan: SequencePlan,
    events: Option<mpsc::UnboundedSender<SequenceEvent>>,
    completed: bool,
}

impl PatternSequencer {
    pub fn new(session: CaptureSession, plan: SequencePlan) -> Self {
        Self {
            session,
            plan,
            events: None,
            completed: false,
        }
    }

    /// Receive progress events from now on
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SequenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn plan(&self) -> &SequencePlan {
        &self.plan
    }

    fn emit(&self, event: SequenceEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the whole plan from the first pattern
    ///
    /// Waits for the session to be ready first. Calling `run` again after a
    /// finished or failed run starts over (retake).
    pub async fn run(
        &mut self,
        display: &mut dyn PatternDisplay,
        sink: &dyn FrameSink,
    ) -> SequenceResult<SequenceOutput> {
        if self.plan.patterns.is_empty() || self.plan.passes.is_empty() {
            return Err(SequenceError::NoPatterns);
        }
        self.completed = false;

        let lease = self.session.wait_ready(self.plan.ready_timeout).await?;
        info!(
            mode = %self.plan.mode,
            patterns = self.plan.patterns.len(),
            passes = self.plan.passes.len(),
            "Starting capture run"
        );

        display.enter_fullscreen();
        let result = self.capture_all(&lease, display, sink).await;
        display.leave_fullscreen();

        match result {
            Ok(frames) => self.complete(frames),
            Err(err) => {
                warn!(error = %err, "Capture run aborted");
                Err(err)
            }
        }
    }

    async fn capture_all(
        &self,
        lease: &SessionLease,
        display: &mut dyn PatternDisplay,
        sink: &dyn FrameSink,
    ) -> SequenceResult<Vec<CapturedFrame>> {
        let patterns = &self.plan.patterns;
        let total = patterns.len();
        let last_slot = self.plan.expected_frames() - 1;
        let mut frames = Vec::with_capacity(self.plan.expected_frames());

        for (pass_index, profile) in self.plan.passes.iter().enumerate() {
            if let Some(previous) = pass_index.checked_sub(1).map(|i| self.plan.passes[i].kind) {
                info!(from = %previous, to = %profile.kind, "Switching pass");
                self.emit(SequenceEvent::PassChanged {
                    from: previous,
                    to: profile.kind,
                });
            }

            let mut index = 0;
            let mut attempts = 0;
            while index < total {
                if !lease.is_current() {
                    return Err(SequenceError::Cancelled);
                }
                let slot = pass_index * total + index;
                let pattern = &patterns[index];

                display.show(pattern, index, total);
                self.emit(SequenceEvent::PatternShown {
                    pass: profile.kind,
                    index,
                    pattern: pattern.name.clone(),
                });

                self.session.adjust_settings(&profile.settings).await;
                if !lease.sleep(profile.dwell).await {
                    debug!(slot, "Dwell interrupted by teardown");
                    return Err(SequenceError::Cancelled);
                }

                match self.session.capture_frame() {
                    Some(encoded) if lease.is_current() => {
                        let frame = CapturedFrame::new(encoded, pattern, profile.kind, index, slot);
                        debug!(
                            slot,
                            pattern = %frame.pattern,
                            width = frame.width,
                            height = frame.height,
                            luminance = frame.mean_luminance,
                            "Frame captured"
                        );
                        sink.accept(&frame);
                        self.emit(SequenceEvent::FrameCaptured {
                            pass: profile.kind,
                            index,
                            slot,
                        });
                        frames.push(frame);
                        index += 1;
                        attempts = 0;
                        if slot == last_slot {
                            break;
                        }
                    }
                    Some(_) => return Err(SequenceError::Cancelled),
                    None => {
                        if !lease.is_current() {
                            return Err(SequenceError::Cancelled);
                        }
                        attempts += 1;
                        warn!(slot, attempts, "Capture returned no frame");
                        if attempts >= self.plan.max_attempts {
                            return Err(SequenceError::Stalled { slot, attempts });
                        }
                    }
                }

                if !lease.sleep(self.plan.gap).await {
                    return Err(SequenceError::Cancelled);
                }
            }
        }

        Ok(frames)
    }

    /// Validate the frame count and signal completion once
    fn complete(&mut self, mut frames: Vec<CapturedFrame>) -> SequenceResult<SequenceOutput> {
        let expected = self.plan.expected_frames();
        if frames.len() > expected {
            warn!(expected, actual = frames.len(), "Discarding surplus frames");
            frames.truncate(expected);
        }
        if frames.len() < expected {
            error!(expected, actual = frames.len(), "Frame count mismatch");
            return Err(SequenceError::CountMismatch {
                expected,
                actual: frames.len(),
            });
        }

        if !std::mem::replace(&mut self.completed, true) {
            info!(count = expected, "Capture run complete");
            self.emit(SequenceEvent::Completed { count: expected });
        }

        Ok(SequenceOutput {
            mode: self.plan.mode,
            patterns: self.plan.patterns.clone(),
            frames,
        })
    }
}
