// SPDX-License-Identifier: GPL-3.0-only

//! Panel Capture - calibrated display-panel photography
//!
//! Captures one photo per full-screen test pattern, uploads every frame in
//! the background, and submits the reviewed set to the panel backend.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera backend abstraction (V4L2, synthetic)
//! - [`devices`]: Device enumeration and selection
//! - [`session`]: Capture session state machine and camera settings
//! - [`sequencer`]: Pattern sequencing across capture passes
//! - [`upload`]: Fire-and-forget frame upload
//! - [`review`]: Approval, retake and discard of finished runs
//! - [`api`]: Panel backend REST client
//! - [`pipelines`]: PNG encoding and frame analysis
//! - [`config`]: User configuration handling
//! - [`storage`]: Run directories and manifests
//!
//! # Example
//!
//! ```ignore
//! let session = CaptureSession::new(get_backend_for_type(config.backend), SessionOptions::from_config(&config));
//! let mut selector = DeviceSelector::new(session.clone(), config.device_denylist.clone());
//! selector.restore(&config.settings).await?;
//!
//! let (uploads, outcomes) = UploadPipeline::new(store, UploadTarget::new(config.environment, "PX-1"));
//! let mut sequencer = PatternSequencer::new(session, SequencePlan::from_config(CaptureMode::Production, &config));
//! let output = sequencer.run(&mut ConsoleDisplay::new(), &uploads).await?;
//! ```

pub mod api;
pub mod backends;
pub mod config;
pub mod constants;
pub mod devices;
pub mod errors;
pub mod pipelines;
pub mod review;
pub mod sequencer;
pub mod session;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use config::{Config, Environment};
pub use devices::DeviceSelector;
pub use errors::{AppError, AppResult};
pub use review::{ApprovalPolicy, ReviewSession};
pub use sequencer::{CaptureMode, CapturedFrame, PatternSequencer, SequencePlan};
pub use session::{CameraSettings, CaptureSession, SessionOptions};
pub use upload::{UploadPipeline, UploadTarget};
