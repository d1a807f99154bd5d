// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Running a capture sequence with interactive review
//! - Inspecting the configuration
//! - Looking up a PPID

use panel_capture::api::ApiClient;
use panel_capture::backends::camera::{CameraBackendType, get_backend_for_type};
use panel_capture::review::{ReviewError, ReviewSession, ReviewState, settled_passes};
use panel_capture::sequencer::{ConsoleDisplay, SequenceError};
use panel_capture::storage::RunDirectory;
use panel_capture::upload::{
    HttpObjectStore, ObjectStore, UploadLedger, UploadPipeline, UploadState, UploadTarget,
};
use panel_capture::{
    AppError, AppResult, CaptureMode, CaptureSession, Config, DeviceSelector, Environment,
    PatternSequencer, SequencePlan, SessionOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// How long review waits for outstanding uploads
const UPLOAD_WAIT: Duration = Duration::from_secs(30);

const TOKEN_VAR: &str = "PANEL_CAPTURE_TOKEN";
const USERNAME_VAR: &str = "PANEL_CAPTURE_USERNAME";
const PASSWORD_VAR: &str = "PANEL_CAPTURE_PASSWORD";

pub struct CaptureArgs {
    pub ppid: String,
    pub mode: CaptureMode,
    pub camera: Option<usize>,
    pub synthetic: bool,
    pub output: Option<PathBuf>,
    pub env: Option<Environment>,
}

fn backend_type(config: &Config, synthetic: bool) -> CameraBackendType {
    if synthetic {
        CameraBackendType::Synthetic
    } else {
        config.backend
    }
}

/// List all available cameras
pub fn list_cameras(synthetic: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let session = CaptureSession::new(
        get_backend_for_type(backend_type(&config, synthetic)),
        SessionOptions::from_config(&config),
    );
    let selector = DeviceSelector::new(session, config.device_denylist.clone());

    let cameras = selector.list_devices();
    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {} ({})", index, camera.label, camera.id);

        let resolutions = selector.list_resolutions(camera);
        if !resolutions.is_empty() {
            // Show top 3 resolutions
            let labels: Vec<String> = resolutions.iter().take(3).map(|r| r.label()).collect();
            println!("      Resolutions: {}", labels.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Print the config path and effective configuration
pub fn show_config(save: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    match Config::path() {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (no config directory)"),
    }
    println!("{}", serde_json::to_string_pretty(&config)?);

    if save {
        let path = config.save()?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

/// Look up a PPID on the backend
pub fn check_ppid(ppid: &str, env: Option<Environment>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    if let Some(env) = env {
        config.environment = env;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let check = rt.block_on(async {
        let client = connect(&config).await?;
        Ok::<_, AppError>(client.check_panel(ppid).await?)
    })?;

    if check.exists {
        println!("{} already has a record.", ppid);
    } else {
        println!("{} is new.", ppid);
    }
    if let Some(recommended) = check.recommended_ppid {
        println!("Recommended PPID: {}", recommended);
    }
    Ok(())
}

/// Build an authenticated API client from the environment
async fn connect(config: &Config) -> AppResult<ApiClient> {
    let client = ApiClient::new(config.api_base_url())?;
    if let Ok(token) = std::env::var(TOKEN_VAR) {
        return Ok(client.with_token(token));
    }

    match (std::env::var(USERNAME_VAR), std::env::var(PASSWORD_VAR)) {
        (Ok(username), Ok(password)) => {
            let mut client = client;
            client.login(&username, &password).await?;
            Ok(client)
        }
        _ => Err(AppError::Other(format!(
            "Set {} or {} and {} to reach the backend",
            TOKEN_VAR, USERNAME_VAR, PASSWORD_VAR
        ))),
    }
}

/// Set by Ctrl+C; every wait on uploads or the operator watches it
#[derive(Clone)]
struct Interrupt(watch::Receiver<bool>);

impl Interrupt {
    /// Route Ctrl+C to the session and to every interruptible wait
    fn install(session: CaptureSession) -> AppResult<Self> {
        let (trigger, interrupt) = Self::channel();
        ctrlc::set_handler(move || {
            trigger.send_replace(true);
            session.teardown();
        })
        .map_err(|e| AppError::Other(e.to_string()))?;
        Ok(interrupt)
    }

    fn channel() -> (watch::Sender<bool>, Self) {
        let (trigger, rx) = watch::channel(false);
        (trigger, Self(rx))
    }

    fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    async fn fired(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|&set| set).await.is_err() {
            // Handler gone, nothing can interrupt any more
            std::future::pending::<()>().await;
        }
    }

    /// Run `work` unless Ctrl+C comes first
    async fn guard<F: Future>(&self, work: F) -> AppResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.fired() => Err(AppError::Interrupted),
            output = work => Ok(output),
        }
    }
}

/// Run a capture sequence with interactive review
pub fn capture(args: CaptureArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    if let Some(env) = args.env {
        config.environment = env;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run_capture(config, args));
    // An interrupted prompt leaves its stdin read behind
    rt.shutdown_background();

    match result {
        Err(AppError::Interrupted) => {
            println!();
            println!("Interrupted.");
            Ok(())
        }
        other => Ok(other?),
    }
}

async fn run_capture(mut config: Config, args: CaptureArgs) -> AppResult<()> {
    let session = CaptureSession::new(
        get_backend_for_type(backend_type(&config, args.synthetic)),
        SessionOptions::from_config(&config),
    );
    let interrupt = Interrupt::install(session.clone())?;

    let result = capture_runs(&session, &interrupt, &mut config, &args).await;
    session.release().await;

    match result {
        // Ctrl+C tears the session down, which surfaces as whatever the
        // interrupted step reports
        Err(_) if interrupt.is_set() => Err(AppError::Interrupted),
        other => other,
    }
}

async fn capture_runs(
    session: &CaptureSession,
    interrupt: &Interrupt,
    config: &mut Config,
    args: &CaptureArgs,
) -> AppResult<()> {
    let mut selector = DeviceSelector::new(session.clone(), config.device_denylist.clone());
    let active = match args.camera {
        Some(index) => {
            let devices = selector.list_devices();
            let device = devices.get(index).cloned().ok_or_else(|| {
                AppError::Other(format!(
                    "Camera index {} out of range ({} available)",
                    index,
                    devices.len()
                ))
            })?;
            selector.select_device(&device).await?
        }
        None => selector.restore(&config.settings).await?,
    };
    if let Some(device) = selector.selected_device() {
        println!("Using camera: {} at {}", device.label, active);
    }

    selector.persist(&mut config.settings);
    if !args.synthetic {
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save camera selection");
        }
    }

    let remote: Option<Arc<dyn ObjectStore>> = match &args.output {
        Some(_) => None,
        None => Some(Arc::new(HttpObjectStore::new(
            config.storage_base_url(),
            config.storage_token.clone(),
        )?)),
    };
    let target = UploadTarget::new(config.environment, args.ppid.clone());
    let mut plan = SequencePlan::from_config(args.mode, config);
    let mut display = ConsoleDisplay::new();

    println!(
        "Capturing {} patterns ({} mode, {} environment)",
        plan.patterns.len(),
        args.mode,
        config.environment
    );

    loop {
        let run_dir = args
            .output
            .as_ref()
            .map(|root| RunDirectory::new(root, &args.ppid, chrono::Utc::now()));
        let store: Arc<dyn ObjectStore> = match (&run_dir, &remote) {
            (Some(run), _) => Arc::new(run.store()),
            (None, Some(remote)) => Arc::clone(remote),
            (None, None) => return Err(AppError::Other("No object store configured".to_string())),
        };

        let (uploads, mut outcomes) = UploadPipeline::new(store, target.clone());
        let mut sequencer = PatternSequencer::new(session.clone(), plan.clone());
        let output = match sequencer.run(&mut display, &uploads).await {
            Ok(output) => output,
            Err(SequenceError::Cancelled) if !interrupt.is_set() => {
                println!("Capture cancelled.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        println!("Captured {} frames, waiting for uploads...", output.count());
        let mut ledger = UploadLedger::new(output.count());
        if !interrupt.guard(ledger.drain(&mut outcomes, UPLOAD_WAIT)).await? {
            warn!(pending = ?ledger.pending_slots(), "Uploads still pending");
        }

        if let Some(run) = &run_dir {
            if let Err(e) = run.write_manifest(&output, ledger.states()).await {
                warn!(error = %e, "Failed to write run manifest");
            } else {
                println!("Saved to {}", run.path().display());
            }
        }

        let mut reviews = ReviewSession::for_output(&output, &args.ppid, config.approval_policy);
        for review in reviews.iter_mut() {
            review.sync_uploads(&ledger);
        }

        match review_all(&mut reviews, config, interrupt).await? {
            ReviewState::RetakeRequested => {
                // Approved and discarded passes stay closed
                plan = plan.without_passes(&settled_passes(&reviews));
                println!("Retaking from the first pattern.");
            }
            _ => return Ok(()),
        }
    }
}

/// Prompt for each pass; stops at the first retake
async fn review_all(
    reviews: &mut [ReviewSession],
    config: &Config,
    interrupt: &Interrupt,
) -> AppResult<ReviewState> {
    let mut client: Option<ApiClient> = None;

    for review in reviews.iter_mut() {
        print_review(review);

        while review.state() == ReviewState::Reviewing {
            let answer = interrupt
                .guard(prompt("[a]pprove, [r]etake or [d]iscard? "))
                .await??;
            match answer.to_lowercase().as_str() {
                "a" | "approve" => {
                    let defects = interrupt
                        .guard(prompt("Defects (comma separated, empty for none): "))
                        .await??;
                    let defects: Vec<String> = defects
                        .split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect();

                    if client.is_none() {
                        match interrupt.guard(connect(config)).await? {
                            Ok(api) => client = Some(api),
                            Err(e) => {
                                println!("Cannot reach the backend: {}", e);
                                continue;
                            }
                        }
                    }
                    let Some(api) = client.as_ref() else {
                        continue;
                    };
                    match interrupt.guard(review.approve(api, &defects)).await? {
                        Ok(created) => match created.task_id {
                            Some(task) => println!("Submitted, inference task {}", task),
                            None => println!("Submitted."),
                        },
                        Err(e @ (ReviewError::UploadsPending(_) | ReviewError::UploadsFailed(_))) => {
                            println!("Cannot approve: {}", e);
                        }
                        Err(e) => println!("Submission failed, you can retry: {}", e),
                    }
                }
                "r" | "retake" => {
                    review.retake();
                    return Ok(ReviewState::RetakeRequested);
                }
                "d" | "discard" => review.discard(),
                _ => println!("Please answer a, r or d."),
            }
        }
    }

    Ok(reviews
        .last()
        .map(|r| r.state())
        .unwrap_or(ReviewState::Discarded))
}

fn print_review(review: &ReviewSession) {
    println!();
    println!("Pass: {}", review.pass());
    for (frame, upload) in review.frames().iter().zip(review.uploads()) {
        let status = match upload {
            UploadState::Uploaded(url) => url.as_str(),
            UploadState::Failed => "upload failed",
            UploadState::Pending => "upload pending",
        };
        println!(
            "  {:>2}. {:<22} {}x{}  luma {:.3}  {}",
            frame.index + 1,
            frame.pattern,
            frame.width,
            frame.height,
            frame.mean_luminance,
            status
        );
    }
}

/// Read one trimmed line without blocking the runtime
async fn prompt(question: &str) -> AppResult<String> {
    let question = question.to_string();
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Write;
        print!("{}", question);
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        Ok(line)
    })
    .await
    .map_err(|e| AppError::Other(e.to_string()))??;

    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_ends_a_pending_wait() {
        let (trigger, interrupt) = Interrupt::channel();
        let waiting = tokio::spawn({
            let interrupt = interrupt.clone();
            async move { interrupt.guard(std::future::pending::<()>()).await }
        });

        trigger.send_replace(true);

        assert!(matches!(waiting.await.unwrap(), Err(AppError::Interrupted)));
        assert!(interrupt.is_set());
    }

    #[tokio::test]
    async fn test_interrupt_before_the_wait_still_counts() {
        let (trigger, interrupt) = Interrupt::channel();
        trigger.send_replace(true);

        assert!(matches!(
            interrupt.guard(async { 1 }).await,
            Err(AppError::Interrupted)
        ));
    }

    #[tokio::test]
    async fn test_work_completes_without_interrupt() {
        let (_trigger, interrupt) = Interrupt::channel();
        assert_eq!(interrupt.guard(async { 7 }).await.unwrap(), 7);
        assert!(!interrupt.is_set());
    }
}
