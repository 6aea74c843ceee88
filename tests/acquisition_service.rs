//! End-to-end tests for scripted acquisition runs
//!
//! Every test drives `AcquisitionService::run_acquisition` against the mock
//! rig and inspects the sealed archive with `ArchiveReader`.

use spectropol_daq::acquisition::archive::{
    preview_entry_name, raw_entry_name, ArchiveReader, ArchiveReopen, METADATA_ENTRY,
};
use spectropol_daq::acquisition::{AcquisitionService, RecordingNotifier};
use spectropol_daq::config::RunSettings;
use spectropol_daq::hardware::capabilities::{
    CameraMode, CameraModeControl, CaptureRouting, Triggerable,
};
use spectropol_daq::hardware::mock::MockRig;
use spectropol_daq::hardware::{AcquisitionInstruments, Frame, FrameSink};
use spectropol_daq::AcquisitionError;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_test::traced_test;

// =============================================================================
// Helpers
// =============================================================================

const STEP_1: &str = "1\t5\t1\t0\t550\t0\t45\t1";
const STEP_2: &str = "2\t5\t2\t0.25\t600\t90\t45\t2";

fn script(path: &str, num_steps: usize, steps: &[&str]) -> String {
    let mut text = format!(
        "VERSION 1.0\n\
         ACQUISITION\n\
         project: P1\n\
         experiment: E1\n\
         path: {path}\n\
         date: 2024-01-01\n\
         operator: A\n\
         sample: quartz\n\
         num_steps: {num_steps}\n\
         STEPS\n"
    );
    for step in steps {
        text.push_str(step);
        text.push('\n');
    }
    text
}

fn service(
    mock: &MockRig,
    root: &Path,
    timeout_ms: u64,
    reopen: ArchiveReopen,
) -> (AcquisitionService, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let settings = RunSettings {
        data_root: root.to_path_buf(),
        capture_timeout_ms: timeout_ms,
        archive_reopen: reopen,
    };
    let service = AcquisitionService::new(Arc::new(mock.rig()), notifier.clone(), settings);
    (service, notifier)
}

#[derive(Default)]
struct CountingSink(AtomicUsize);

impl FrameSink for CountingSink {
    fn on_capture_complete(&self, _frame: Frame) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Successful runs
// =============================================================================

#[tokio::test]
async fn test_two_step_run_fills_archive() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    let report = service
        .run_acquisition(&script("out/run1.zip", 2, &[STEP_1, STEP_2]))
        .await
        .unwrap();

    let archive_path = dir.path().join("out/run1.zip");
    assert_eq!(report.archive_path, archive_path);
    assert_eq!(report.steps_completed, 2);
    assert_eq!(report.version.as_deref(), Some("1.0"));

    let mut reader = ArchiveReader::open(&archive_path).unwrap();
    for position in 0..2 {
        assert!(reader.contains(&raw_entry_name(position)));
        assert!(reader.contains(&preview_entry_name(position)));
    }
    assert!(reader.contains("raw/frame_000.bin"));
    assert!(reader.contains("png/frame_001.png"));
    assert_eq!(reader.raw_count(), 2);
    assert_eq!(reader.preview_count(), 2);

    let meta = reader.metadata().unwrap();
    assert_eq!(meta.run_id, report.run_id);
    assert_eq!(meta.descriptor.project, "P1");
    assert_eq!(meta.descriptor.experiment, "E1");
    assert_eq!(meta.descriptor.path, "out/run1.zip");
    assert_eq!(meta.descriptor.operator, "A");
    assert_eq!(meta.descriptor.metadata.get("sample").map(String::as_str), Some("quartz"));
    assert_eq!(meta.steps.len(), 2);
    assert_eq!(meta.steps[1].z_position_mm, 0.25);

    let (w, h) = mock.camera.resolution();
    let raw = reader.raw(1).unwrap();
    assert_eq!((raw.width, raw.height), (w, h));
    assert_eq!(reader.preview(1).unwrap().dimensions(), (w, h));

    let messages = notifier.messages();
    assert_eq!(messages.first().map(String::as_str), Some("Starting acquisition..."));
    assert_eq!(messages.last().map(String::as_str), Some("Acquisition DONE!"));
    let oks: Vec<&str> = messages
        .iter()
        .map(String::as_str)
        .filter(|m| m.ends_with(": OK"))
        .collect();
    assert_eq!(oks, vec!["0: OK", "1: OK"]);
}

#[tokio::test]
async fn test_metadata_document_uses_tooling_keys() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap();

    let mut reader = ArchiveReader::open(dir.path().join("run.zip")).unwrap();
    let json: serde_json::Value =
        serde_json::from_slice(&reader.entry_bytes(METADATA_ENTRY).unwrap()).unwrap();
    assert_eq!(json["project"], "P1");
    assert_eq!(json["num_steps"], 1);
    assert_eq!(json["version"], "1.0");
    assert_eq!(json["metadata"]["sample"], "quartz");
    let step = &json["steps"][0];
    for key in ["step", "t_int", "gain", "z_pos", "lam", "phi_a", "phi_g", "flt_a"] {
        assert!(step.get(key).is_some(), "missing step key {key}");
    }
    assert_eq!(step["flt_a"], "1");
}

#[tokio::test]
async fn test_camera_mode_and_routing_restored_after_success() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    mock.camera.set_mode(CameraMode::Live).await.unwrap();

    let interactive = Arc::new(CountingSink::default());
    mock.camera
        .capture_router()
        .set_sink(interactive.clone())
        .unwrap();

    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);
    service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap();

    // Run frames never reached the interactive sink.
    assert_eq!(interactive.0.load(Ordering::SeqCst), 0);
    assert_eq!(mock.camera.mode().await.unwrap(), CameraMode::Live);
    assert!(!mock.rig().capture_router().is_held());

    // Interactive captures flow to the interactive sink again.
    mock.camera.arm().await.unwrap();
    mock.camera.trigger().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while interactive.0.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_run_emits_structured_step_events() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap();

    assert!(logs_contain("Step recorded"));
    assert!(logs_contain("Archive closed"));
}

// =============================================================================
// Rejected scripts
// =============================================================================

#[tokio::test]
async fn test_step_count_mismatch_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    let err = service
        .run_acquisition(&script("out/run1.zip", 3, &[STEP_1, STEP_2]))
        .await
        .unwrap_err();

    assert!(matches!(err, AcquisitionError::ScriptValidation(_)));
    assert_eq!(mock.configuration_calls(), 0);
    assert!(notifier.messages().is_empty());
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_bad_filter_code_is_a_step_field_error() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    let err = service
        .run_acquisition(&script("run.zip", 1, &["1\t5\t1\t0\t550\t0\t45\t5"]))
        .await
        .unwrap_err();

    match err {
        AcquisitionError::StepField { literal, .. } => assert_eq!(literal, "5"),
        other => panic!("expected StepField, got {other:?}"),
    }
    assert_eq!(mock.configuration_calls(), 0);
    assert!(!dir.path().join("run.zip").exists());
}

// =============================================================================
// Aborted runs
// =============================================================================

#[tokio::test]
async fn test_missing_completion_times_out_with_valid_archive() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    mock.camera.set_drop_frames(true);
    let (service, notifier) = service(&mock, dir.path(), 100, ArchiveReopen::Fresh);

    let err = service
        .run_acquisition(&script("run.zip", 2, &[STEP_1, STEP_2]))
        .await
        .unwrap_err();

    assert!(matches!(err, AcquisitionError::CaptureTimeout { step: 0, .. }));
    // The second step was never attempted.
    assert_eq!(mock.camera.trigger_count(), 1);
    assert_eq!(mock.tunable_filter.set_count(), 1);

    let mut reader = ArchiveReader::open(dir.path().join("run.zip")).unwrap();
    assert_eq!(reader.raw_count(), 0);
    assert_eq!(reader.metadata().unwrap().steps.len(), 2);

    let last = notifier.messages().last().cloned().unwrap();
    assert!(last.starts_with("Acquisition FAILED:"), "{last}");
    assert!(!mock.rig().capture_router().is_held());
}

#[tokio::test]
async fn test_device_failure_keeps_completed_steps() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    // Step 2 asks for an angle the rotator cannot reach.
    let bad_step = "2\t5\t1\t0\t600\t400\t45\t2";
    let err = service
        .run_acquisition(&script("run.zip", 2, &[STEP_1, bad_step]))
        .await;
    // 400 degrees is rejected by the parser before the rig is involved.
    assert!(matches!(err, Err(AcquisitionError::StepField { .. })));

    mock.rotator_a.set_fault(true);
    let err = service
        .run_acquisition(&script("run.zip", 2, &[STEP_1, STEP_2]))
        .await
        .unwrap_err();
    match &err {
        AcquisitionError::DeviceConfig { step, source } => {
            assert_eq!(*step, 0);
            assert!(format!("{source:#}").contains("rotator A move failed"));
        }
        other => panic!("expected DeviceConfig, got {other:?}"),
    }
    assert_eq!(mock.camera.trigger_count(), 0);

    let reader = ArchiveReader::open(dir.path().join("run.zip")).unwrap();
    assert_eq!(reader.raw_count(), 0);
    assert!(notifier
        .messages()
        .iter()
        .any(|m| m.starts_with("Acquisition FAILED:")));
}

#[tokio::test]
async fn test_wavelength_outside_filter_range_aborts() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    let far_red = "2\t5\t1\t0\t900\t0\t45\t1";
    let err = service
        .run_acquisition(&script("run.zip", 2, &[STEP_1, far_red]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AcquisitionError::WavelengthOutOfRange { step: 1, .. }
    ));
    let mut reader = ArchiveReader::open(dir.path().join("run.zip")).unwrap();
    assert_eq!(reader.raw_count(), 1);
    assert!(reader.raw(0).is_ok());
}

#[tokio::test]
async fn test_held_route_rejects_run() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);

    let guard = mock
        .camera
        .capture_router()
        .acquire(Arc::new(CountingSink::default()))
        .unwrap();
    let err = service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::RoutingBusy));
    assert_eq!(mock.camera.trigger_count(), 0);
    drop(guard);

    service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap();
}

// =============================================================================
// Reopening archives
// =============================================================================

#[tokio::test]
async fn test_rerun_clears_only_data_regions() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Fresh);
    let path = dir.path().join("run.zip");

    service
        .run_acquisition(&script("run.zip", 2, &[STEP_1, STEP_2]))
        .await
        .unwrap();

    {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let mut zip = zip::ZipWriter::new_append(file).unwrap();
        zip.start_file("notes.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"lamp replaced").unwrap();
        zip.finish().unwrap();
    }

    let second = service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap();

    let mut reader = ArchiveReader::open(&path).unwrap();
    assert_eq!(reader.raw_count(), 1);
    assert_eq!(reader.preview_count(), 1);
    assert!(!reader.contains(&raw_entry_name(1)));
    assert_eq!(reader.entry_bytes("notes.txt").unwrap(), b"lamp replaced");
    assert_eq!(reader.metadata().unwrap().run_id, second.run_id);
}

#[tokio::test]
async fn test_merge_mode_keeps_previous_frames() {
    let dir = TempDir::new().unwrap();
    let mock = MockRig::fast();
    let (service, _notifier) = service(&mock, dir.path(), 2000, ArchiveReopen::Merge);

    service
        .run_acquisition(&script("run.zip", 2, &[STEP_1, STEP_2]))
        .await
        .unwrap();
    service
        .run_acquisition(&script("run.zip", 1, &[STEP_1]))
        .await
        .unwrap();

    let reader = ArchiveReader::open(dir.path().join("run.zip")).unwrap();
    assert_eq!(reader.raw_count(), 2);
    assert_eq!(reader.preview_count(), 2);
}
