// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end capture runs against the synthetic camera

use futures::future::BoxFuture;
use panel_capture::api::{ApiResult, CreatedPanel, PanelRecord};
use panel_capture::backends::camera::{
    CameraBackend, Capabilities, ControlKind, ControlRange, ControlValue, SyntheticBackend, SyntheticCameraConfig,
    SyntheticProbe,
};
use panel_capture::review::{PanelRecordSink, ReviewState, settled_passes};
use panel_capture::sequencer::{
    CapturedFrame, FrameSink, PassKind, RecordingDisplay, SequenceError, SequenceEvent,
};
use panel_capture::session::ExposureMode;
use panel_capture::upload::{ObjectStore, UploadLedger, UploadResult};
use panel_capture::{
    ApprovalPolicy, CameraSettings, CaptureMode, CaptureSession, Config, Environment,
    PatternSequencer, ReviewSession, SequencePlan, SessionOptions, UploadPipeline, UploadTarget,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory store with per-pattern latency
#[derive(Default)]
struct MemoryStore {
    delays: HashMap<String, Duration>,
    keys: Mutex<Vec<String>>,
}

impl ObjectStore for MemoryStore {
    fn put<'a>(&'a self, key: &'a str, _png: Arc<[u8]>) -> BoxFuture<'a, UploadResult<String>> {
        Box::pin(async move {
            let delay = self
                .delays
                .iter()
                .find(|(pattern, _)| key.contains(&format!("_{}_", pattern)))
                .map(|(_, d)| *d)
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("mem://{}", key))
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<usize>>);

impl FrameSink for CollectingSink {
    fn accept(&self, frame: &CapturedFrame) {
        self.0.lock().unwrap().push(frame.slot);
    }
}

#[derive(Default)]
struct RecordSink(Mutex<Vec<PanelRecord>>);

impl PanelRecordSink for RecordSink {
    fn create_panel<'a>(&'a self, record: &'a PanelRecord) -> BoxFuture<'a, ApiResult<CreatedPanel>> {
        Box::pin(async move {
            self.0.lock().unwrap().push(record.clone());
            Ok(CreatedPanel {
                id: None,
                task_id: Some("task-1".to_string()),
            })
        })
    }
}

fn config_with(patterns: &[&str]) -> Config {
    let mut config = Config::default();
    if !patterns.is_empty() {
        config.patterns = patterns.iter().map(|s| s.to_string()).collect();
    }
    config
}

async fn ready_session(camera: SyntheticCameraConfig, config: &Config) -> (CaptureSession, SyntheticProbe) {
    let backend = SyntheticBackend::new(camera);
    let probe = backend.probe();
    let device = backend.enumerate_cameras().remove(0);
    let session = CaptureSession::new(Box::new(backend), SessionOptions::from_config(config));
    session.setup(&device, None).await.unwrap();
    (session, probe)
}

fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SequenceEvent>) -> Vec<SequenceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_single_pass_yields_one_frame_per_pattern() {
    let config = config_with(&["white", "black", "red", "green"]);
    let (session, _) = ready_session(SyntheticCameraConfig::default(), &config).await;
    let mut sequencer =
        PatternSequencer::new(session, SequencePlan::from_config(CaptureMode::Production, &config));

    let output = sequencer
        .run(&mut RecordingDisplay::default(), &())
        .await
        .unwrap();

    assert_eq!(output.count(), 4);
    for (position, frame) in output.frames.iter().enumerate() {
        assert_eq!(frame.index, position);
        assert_eq!(frame.slot, position);
        assert_eq!(frame.pattern, config.patterns[position]);
        assert_eq!((frame.width, frame.height), (640, 480));
    }
}

#[tokio::test(start_paused = true)]
async fn test_completion_fires_once_per_run() {
    let config = config_with(&["white", "black"]);
    let (session, _) = ready_session(SyntheticCameraConfig::default(), &config).await;
    let mut sequencer =
        PatternSequencer::new(session, SequencePlan::from_config(CaptureMode::Production, &config));
    let mut events = sequencer.subscribe();

    sequencer.run(&mut RecordingDisplay::default(), &()).await.unwrap();
    let first: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SequenceEvent::Completed { .. }))
        .collect();
    assert_eq!(first, vec![SequenceEvent::Completed { count: 2 }]);

    // Retake starts over and completes once more
    sequencer.run(&mut RecordingDisplay::default(), &()).await.unwrap();
    let completed = drain_events(&mut events)
        .iter()
        .filter(|e| matches!(e, SequenceEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_settings_without_exposure_apply_focus_only() {
    let config = config_with(&[]);
    let camera = SyntheticCameraConfig {
        capabilities: Capabilities::new()
            .with(ControlKind::FocusMode, ControlRange::new(0, 1, 1, 1))
            .with(ControlKind::FocusDistance, ControlRange::new(0, 250, 5, 0)),
        ..Default::default()
    };
    let (session, probe) = ready_session(camera, &config).await;

    let effective = session
        .adjust_settings(&CameraSettings {
            exposure_mode: Some(ExposureMode::Manual),
            focus_distance: Some(50),
            ..Default::default()
        })
        .await;

    assert_eq!(probe.applied(), vec![ControlValue::FocusDistance(50)]);
    assert_eq!(effective.exposure_mode, None);
    assert_eq!(effective.focus_distance, Some(50));
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_uploads_land_at_their_slot() {
    let config = config_with(&["white", "black", "red", "green"]);
    let (session, _) = ready_session(SyntheticCameraConfig::default(), &config).await;
    let store = MemoryStore {
        delays: HashMap::from([("black".to_string(), Duration::from_secs(60))]),
        ..Default::default()
    };
    let (uploads, mut outcomes) = UploadPipeline::new(
        Arc::new(store),
        UploadTarget::new(Environment::Staging, "PX-7"),
    );
    let mut sequencer =
        PatternSequencer::new(session, SequencePlan::from_config(CaptureMode::Production, &config));

    let output = sequencer
        .run(&mut RecordingDisplay::default(), &uploads)
        .await
        .unwrap();

    let mut arrival = Vec::new();
    let mut ledger = UploadLedger::new(output.count());
    while arrival.len() < output.count() {
        let outcome = outcomes.recv().await.unwrap();
        arrival.push(outcome.slot);
        ledger.record(outcome);
    }

    // Slot 1 resolves last, after slot 3
    assert_eq!(arrival.last(), Some(&1));
    assert!(ledger.is_complete());
    for (slot, frame) in output.frames.iter().enumerate() {
        let url = ledger.state(slot).and_then(|s| s.url()).unwrap();
        assert!(url.contains(&format!("_{}_", frame.pattern)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_teardown_mid_dwell_records_nothing() {
    let config = config_with(&["white", "black", "red"]);
    let (session, _) = ready_session(SyntheticCameraConfig::default(), &config).await;
    let mut sequencer = PatternSequencer::new(
        session.clone(),
        SequencePlan::from_config(CaptureMode::Production, &config),
    );
    let mut events = sequencer.subscribe();
    let sink = Arc::new(CollectingSink::default());

    let run = {
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let mut display = RecordingDisplay::default();
            sequencer.run(&mut display, &*sink).await
        })
    };

    // Wait until the second pattern is on screen, then tear down during its dwell
    loop {
        match events.recv().await {
            Some(SequenceEvent::PatternShown { index: 1, .. }) => break,
            Some(_) => continue,
            None => panic!("sequencer ended early"),
        }
    }
    tokio::time::sleep(config.timing.settle() + Duration::from_millis(200)).await;
    session.teardown();

    let result = run.await.unwrap();
    assert!(matches!(result, Err(SequenceError::Cancelled)));

    // Let any stale timer fire; nothing may be recorded after teardown
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*sink.0.lock().unwrap(), vec![0]);
    assert!(!drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, SequenceEvent::FrameCaptured { slot: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_production_run_on_focus_only_device() {
    let config = Config {
        environment: Environment::Production,
        ..Config::default()
    };
    assert_eq!(config.patterns.len(), 15);

    let camera = SyntheticCameraConfig {
        capabilities: Capabilities::new().with(ControlKind::FocusMode, ControlRange::new(0, 1, 1, 1)),
        ..Default::default()
    };
    let (session, probe) = ready_session(camera, &config).await;
    let store = Arc::new(MemoryStore::default());
    let (uploads, mut outcomes) = UploadPipeline::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        UploadTarget::new(config.environment, "PX-15"),
    );
    let mut sequencer =
        PatternSequencer::new(session, SequencePlan::from_config(CaptureMode::Production, &config));

    let output = sequencer
        .run(&mut RecordingDisplay::default(), &uploads)
        .await
        .unwrap();

    let names: Vec<_> = output.frames.iter().map(|f| f.pattern.clone()).collect();
    assert_eq!(names, config.patterns);
    assert_eq!(probe.applied(), vec![ControlValue::FocusAuto(false); 15]);

    let mut ledger = UploadLedger::new(15);
    assert!(ledger.drain(&mut outcomes, Duration::from_secs(5)).await);
    assert_eq!(uploads.submitted(), 15);

    let keys = store.keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 15);
    for frame in &output.frames {
        let expected = format!(
            "production-images/PX-15_{}_{}.png",
            frame.pattern,
            frame.timestamp_millis()
        );
        assert!(keys.contains(&expected), "missing {}", expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_comparison_run_has_independent_passes() {
    let config = config_with(&["white", "black"]);
    let (session, probe) = ready_session(SyntheticCameraConfig::default(), &config).await;
    probe.clear_applied();
    let mut sequencer =
        PatternSequencer::new(session, SequencePlan::from_config(CaptureMode::Comparison, &config));
    let mut events = sequencer.subscribe();

    let output = sequencer
        .run(&mut RecordingDisplay::default(), &())
        .await
        .unwrap();
    assert_eq!(output.count(), 4);

    let events = drain_events(&mut events);
    let switch = events
        .iter()
        .position(|e| {
            *e == SequenceEvent::PassChanged {
                from: PassKind::Auto,
                to: PassKind::Manual,
            }
        })
        .unwrap();
    let auto_captures = events[..switch]
        .iter()
        .filter(|e| matches!(e, SequenceEvent::FrameCaptured { pass: PassKind::Auto, .. }))
        .count();
    assert_eq!(auto_captures, 2);
    assert!(!events[..switch]
        .iter()
        .any(|e| matches!(e, SequenceEvent::FrameCaptured { pass: PassKind::Manual, .. })));

    // The manual profile switches exposure off auto
    assert!(probe.applied().contains(&ControlValue::ExposureAuto(false)));

    let mut reviews = ReviewSession::for_output(&output, "PX-2", ApprovalPolicy::WarnAndAllow);
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].pass(), PassKind::Auto);
    assert_eq!(reviews[1].frames().len(), 2);

    let sink = RecordSink::default();
    reviews[1].approve(&sink, &[]).await.unwrap();
    assert_eq!(reviews[1].state(), ReviewState::Approved);
    assert_eq!(reviews[0].state(), ReviewState::Reviewing);

    let records = sink.0.lock().unwrap();
    assert_eq!(records[0].test_type, "manual");
    assert_eq!(records[0].panel_images[0].pattern_name, "white-manual");
}

#[tokio::test(start_paused = true)]
async fn test_retake_recaptures_only_open_passes() {
    let config = config_with(&["white", "black"]);
    let (session, _) = ready_session(SyntheticCameraConfig::default(), &config).await;
    let plan = SequencePlan::from_config(CaptureMode::Comparison, &config);
    let mut sequencer = PatternSequencer::new(session.clone(), plan.clone());
    let sink = RecordSink::default();

    let output = sequencer
        .run(&mut RecordingDisplay::default(), &())
        .await
        .unwrap();
    let mut reviews = ReviewSession::for_output(&output, "PX-R", ApprovalPolicy::WarnAndAllow);
    reviews[0].approve(&sink, &[]).await.unwrap();
    reviews[1].retake();

    let mut sequencer = PatternSequencer::new(session, plan.without_passes(&settled_passes(&reviews)));
    let mut display = RecordingDisplay::default();
    let output = sequencer.run(&mut display, &()).await.unwrap();

    assert_eq!(output.count(), 2);
    assert_eq!(display.shown, vec!["white", "black"]);
    let mut reviews = ReviewSession::for_output(&output, "PX-R", ApprovalPolicy::WarnAndAllow);
    assert_eq!(reviews.len(), 1);
    reviews[0].approve(&sink, &[]).await.unwrap();

    let records = sink.0.lock().unwrap();
    let passes: Vec<_> = records.iter().map(|r| r.test_type.as_str()).collect();
    assert_eq!(passes, vec!["auto", "manual"]);
}
