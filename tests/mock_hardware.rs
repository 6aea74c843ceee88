//! Integration tests for mock hardware implementations
//!
//! These tests verify that the mock rig devices implement the capability
//! traits and exhibit realistic timing, so dry runs behave like the bench.

use spectropol_daq::acquisition::FilterCode;
use spectropol_daq::config::RigSettings;
use spectropol_daq::hardware::capabilities::{
    CaptureRouting, ExposureControl, FilterSlider, Movable, Triggerable, WavelengthTunable,
};
use spectropol_daq::hardware::mock::{MockCamera, MockRig, MockStage, MockTunableFilter};
use spectropol_daq::hardware::{AcquisitionInstruments, Frame, FrameSink};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::Duration;

// =============================================================================
// MockStage Tests
// =============================================================================

#[tokio::test]
async fn test_mock_stage_timing() {
    let stage = MockStage::new();

    // 2mm at 10mm/sec should take ~200ms
    let start = Instant::now();
    stage.move_abs(2.0).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed.as_millis() >= 190,
        "Expected ~200ms, got {}ms",
        elapsed.as_millis()
    );
}

#[tokio::test]
async fn test_mock_stage_settle_timing() {
    let stage = MockStage::new();
    stage.move_abs(0.01).await.unwrap();

    let start = Instant::now();
    stage.wait_settled().await.unwrap();
    let elapsed = start.elapsed();

    // Default settle is 50ms
    assert!(
        elapsed.as_millis() >= 45,
        "Expected ~50ms, got {}ms",
        elapsed.as_millis()
    );
}

#[tokio::test]
async fn test_rotators_move_concurrently() {
    let settings = RigSettings {
        rotator_speed_deg_per_sec: 900.0,
        settle_ms: 0,
        ..RigSettings::default()
    };
    let mock = MockRig::new(&settings);
    let rig = mock.rig();

    // Each rotator needs ~100ms for 90 degrees; together they must not take 200ms.
    let start = Instant::now();
    rig.configure_rotators(90.0, 90.0).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(mock.rotator_a.position().await.unwrap(), 90.0);
    assert_eq!(mock.rotator_g.position().await.unwrap(), 90.0);
    assert!(
        elapsed.as_millis() < 180,
        "Rotator moves were serialized: {}ms",
        elapsed.as_millis()
    );
}

// =============================================================================
// MockCamera Tests
// =============================================================================

struct ChannelSink(mpsc::UnboundedSender<Frame>);

impl FrameSink for ChannelSink {
    fn on_capture_complete(&self, frame: Frame) {
        let _ = self.0.send(frame);
    }
}

#[tokio::test]
async fn test_mock_camera_exposure_delays_frame() {
    let camera = MockCamera::new(16, 8).with_readout(Duration::from_millis(5));
    camera.set_exposure(0.05).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _route = camera
        .capture_router()
        .acquire(Arc::new(ChannelSink(tx)))
        .unwrap();

    let start = Instant::now();
    camera.arm().await.unwrap();
    camera.trigger().await.unwrap();
    let frame = rx.recv().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(frame.data.len(), 16 * 8);
    assert!(
        elapsed.as_millis() >= 50,
        "Frame arrived after {}ms, before exposure ended",
        elapsed.as_millis()
    );
}

#[tokio::test]
async fn test_mock_camera_frames_differ() {
    let camera = MockCamera::new(4, 4).with_readout(Duration::ZERO);
    camera.set_exposure(0.001).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _route = camera
        .capture_router()
        .acquire(Arc::new(ChannelSink(tx)))
        .unwrap();

    camera.arm().await.unwrap();
    camera.trigger().await.unwrap();
    let first = rx.recv().await.unwrap();
    camera.trigger().await.unwrap();
    let second = rx.recv().await.unwrap();

    assert_ne!(first.data, second.data);
    assert_eq!(camera.get_frame_count(), 2);
}

// =============================================================================
// Optics Tests
// =============================================================================

#[tokio::test]
async fn test_tunable_filter_range() {
    let filter = MockTunableFilter::new(400.0, 720.0);
    assert_eq!(filter.wavelength_range().await.unwrap(), (400.0, 720.0));
    filter.set_wavelength(720.0).await.unwrap();
    assert!(filter.set_wavelength(720.5).await.is_err());
    assert_eq!(filter.wavelength().await.unwrap(), 720.0);
}

#[tokio::test]
async fn test_filter_codes_map_to_slider_positions() {
    let mock = MockRig::fast();
    let rig = mock.rig();
    for (expected, code) in (1u8..).zip(FilterCode::ALL) {
        rig.configure_filter(code).await.unwrap();
        assert_eq!(mock.filter_slider.current_position().await.unwrap(), expected);
    }
    assert_eq!(mock.filter_slider.select_count(), 4);
}
