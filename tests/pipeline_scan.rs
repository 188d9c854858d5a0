//! End-to-end pipeline scenarios against the synthetic sampler and the
//! scripted stub backend.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use fieldscan::store::InMemoryDetectionStore;
use fieldscan::{
    Category, CategorySet, DetectorError, InvalidStateError, Pipeline, RawFinding, RetryPolicy,
    RunState, ScanConfig, ScanEvent, StubBackend,
};

/// One labeled fix per second, latitude stepping by 0.001 per fix.
fn write_srt(path: &Path, fixes: u64) {
    let mut srt = String::new();
    for i in 0..fixes {
        srt.push_str(&format!(
            "{}\n00:00:{:02},000 --> 00:00:{:02},000\n\
             [latitude: {:.3}] [longitude: {:.3}]\n\n",
            i + 1,
            i,
            i + 1,
            48.0 + i as f64 * 0.001,
            2.0,
        ));
    }
    std::fs::write(path, srt).expect("write srt");
}

fn scan_config(dir: &TempDir, duration_secs: u64, fixes: u64) -> ScanConfig {
    let srt_path = dir.path().join("flight.srt");
    write_srt(&srt_path, fixes);
    let mut config = ScanConfig::new(
        &format!("stub://flight?duration={}&width=64&height=48", duration_secs),
        &srt_path,
    );
    config.categories = CategorySet::all();
    config.min_confidence = 0.5;
    config.output_root = dir.path().join("frames");
    config.retry = RetryPolicy::for_tests();
    config
}

fn bare_spot_finding(confidence: f64) -> RawFinding {
    RawFinding {
        category: Some("bare spot".to_string()),
        confidence: Some(json!(confidence)),
        ..RawFinding::default()
    }
}

#[test]
fn scenario_clear_finding_lands_in_store_with_location() {
    let dir = tempfile::tempdir().unwrap();
    let config = scan_config(&dir, 10, 10);
    let backend = StubBackend::new().respond_at(5, vec![bare_spot_finding(0.9)]);

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let handle = pipeline.start_with_backend(Box::new(backend)).unwrap();

    let mut last_progress = 0;
    for event in handle.events.iter() {
        match event {
            ScanEvent::Progress { processed, total } => {
                assert!(processed > last_progress, "progress must increase");
                assert_eq!(total, 10);
                last_progress = processed;
            }
            ScanEvent::Completed(_) | ScanEvent::Aborted { .. } => break,
            ScanEvent::Finding(_) => {}
        }
    }
    let summary = handle.wait().unwrap();

    assert_eq!(pipeline.state(), RunState::Completed);
    assert_eq!(summary.processed_frames, 10);
    assert_eq!(summary.detections, 1);

    let rows = pipeline.snapshot().unwrap();
    assert_eq!(rows.len(), 1);
    let detection = &rows[0];
    assert_eq!(detection.category, Category::BareSpot);
    assert_eq!(detection.source_frame_index, 5);
    assert_eq!(detection.confidence, 0.9);
    let fix = detection.location.expect("frame 5 lies within coverage");
    assert_eq!(fix.offset, Duration::from_secs(5));
    assert_eq!(fix.latitude, 48.005);

    // The annotated frame was persisted and the CSV written.
    assert!(dir.path().join("frames/frame_00005.jpg").exists());
    let results = summary.results_path.expect("results path");
    let parsed = fieldscan::export::read_csv(&results).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].frame_index, 5);
    assert_eq!(parsed[0].latitude, Some(48.005));
}

#[test]
fn scenario_below_threshold_finding_is_dropped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let config = scan_config(&dir, 10, 10);
    let backend = StubBackend::new().respond_at(5, vec![bare_spot_finding(0.4)]);

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let summary = pipeline
        .start_with_backend(Box::new(backend))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(summary.detections, 0);
    assert_eq!(summary.diagnostics.below_threshold, 1);
    assert_eq!(pipeline.snapshot().unwrap().len(), 0);
    // No detection, no persisted frame.
    assert!(!dir.path().join("frames/frame_00005.jpg").exists());
}

#[test]
fn scenario_unavailable_backend_degrades_to_undetermined_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = scan_config(&dir, 10, 10);
    // With two attempts per frame, frame 3 occupies calls 3 and 4.
    let backend = StubBackend::new()
        .fail_at(3, DetectorError::Unavailable("connection refused".into()))
        .fail_at(4, DetectorError::Unavailable("connection refused".into()))
        .respond_at(9, vec![bare_spot_finding(0.9)]);

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let summary = pipeline
        .start_with_backend(Box::new(backend))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(pipeline.state(), RunState::Completed);
    assert_eq!(summary.processed_frames, 10);
    assert_eq!(summary.diagnostics.undetermined_frames, 1);
    // The scan continued past the failure: call 9 is frame 8.
    let rows = pipeline.snapshot().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_frame_index, 8);
}

#[test]
fn frames_outside_telemetry_coverage_carry_no_location() {
    let dir = tempfile::tempdir().unwrap();
    // 10 frames but only 3 fixes; skew of 2s covers frames 0..=4.
    let mut config = scan_config(&dir, 10, 3);
    config.max_skew = Duration::from_secs(2);
    let backend = StubBackend::new().respond_at(9, vec![bare_spot_finding(0.9)]);

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let summary = pipeline
        .start_with_backend(Box::new(backend))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(summary.diagnostics.uncovered_frames, 5);
    let rows = pipeline.snapshot().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].location.is_none());
}

#[test]
fn out_of_order_telemetry_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let srt_path = dir.path().join("flight.srt");
    std::fs::write(
        &srt_path,
        "1\n00:00:05,000 --> 00:00:06,000\nlat: 10.0 lon: 20.0\n\n\
         2\n00:00:03,000 --> 00:00:04,000\nlat: 10.0 lon: 20.0\n\n",
    )
    .unwrap();
    let mut config = ScanConfig::new("stub://flight?duration=5", &srt_path);
    config.min_confidence = 0.5;
    config.output_root = dir.path().join("frames");
    config.retry = RetryPolicy::for_tests();

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let err = pipeline
        .start_with_backend(Box::new(StubBackend::new()))
        .unwrap()
        .wait()
        .unwrap_err();

    assert!(err.to_string().contains("telemetry parsing failed"));
    assert_eq!(pipeline.state(), RunState::Aborted);
}

#[test]
fn second_start_and_reset_are_rejected_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = scan_config(&dir, 10, 10);
    let backend = StubBackend::new().with_delay(Duration::from_millis(50));

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let handle = pipeline.start_with_backend(Box::new(backend)).unwrap();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(pipeline.state(), RunState::Running);

    let start_err = pipeline
        .start_with_backend(Box::new(StubBackend::new()))
        .unwrap_err();
    assert!(start_err.downcast_ref::<InvalidStateError>().is_some());

    let reset_err = pipeline.reset().unwrap_err();
    let invalid = reset_err
        .downcast_ref::<InvalidStateError>()
        .expect("reset while running is an InvalidStateError");
    assert_eq!(invalid.state, RunState::Running);

    handle.wait().unwrap();
    assert_eq!(pipeline.state(), RunState::Completed);
}

#[test]
fn reset_after_completion_clears_store_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scan_config(&dir, 5, 5);
    config.persist_all_frames = true;
    let backend = StubBackend::new().respond_at(2, vec![bare_spot_finding(0.9)]);

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    pipeline
        .start_with_backend(Box::new(backend))
        .unwrap()
        .wait()
        .unwrap();

    let frames_dir = dir.path().join("frames");
    assert_eq!(pipeline.snapshot().unwrap().len(), 1);
    assert!(std::fs::read_dir(&frames_dir).unwrap().count() >= 5);

    pipeline.reset().unwrap();
    assert_eq!(pipeline.state(), RunState::Idle);
    assert_eq!(pipeline.snapshot().unwrap().len(), 0);
    assert_eq!(std::fs::read_dir(&frames_dir).unwrap().count(), 0);
}

#[test]
fn cancellation_aborts_and_keeps_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scan_config(&dir, 10, 10);
    config.persist_all_frames = true;
    let backend = StubBackend::new().with_delay(Duration::from_millis(50));

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    let handle = pipeline.start_with_backend(Box::new(backend)).unwrap();
    std::thread::sleep(Duration::from_millis(120));
    pipeline.cancel();

    let err = handle.wait().unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    assert_eq!(pipeline.state(), RunState::Aborted);

    // Frames persisted before cancellation remain valid partial output.
    let frames_dir = dir.path().join("frames");
    let persisted = std::fs::read_dir(&frames_dir).unwrap().count();
    assert!(persisted >= 1 && persisted < 10);

    // An aborted pipeline can be reset and rerun.
    pipeline.reset().unwrap();
    assert_eq!(pipeline.state(), RunState::Idle);
    let summary = pipeline
        .start_with_backend(Box::new(StubBackend::new()))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(summary.processed_frames, 10);
}

#[test]
fn rerun_is_idempotent_over_the_detection_set() {
    let dir = tempfile::tempdir().unwrap();
    let config = scan_config(&dir, 5, 5);

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new())).unwrap();
    for _ in 0..2 {
        let backend = StubBackend::new().respond_at(2, vec![bare_spot_finding(0.9)]);
        pipeline
            .start_with_backend(Box::new(backend))
            .unwrap()
            .wait()
            .unwrap();
    }
    // The second run re-reports the same finding; the dedup key collapses it.
    assert_eq!(pipeline.snapshot().unwrap().len(), 1);
}
