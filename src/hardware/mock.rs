//! Mock Hardware Implementations
//!
//! Simulated rig devices for testing and dry runs without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockCamera` - Software-triggered camera delivering frames through its capture route
//! - `MockTunableFilter` - Liquid-crystal tunable filter with a fixed range
//! - `MockStage` - Motion stage, used for both rotators (degrees) and focus (mm)
//! - `MockFilterSlider` - Four-position polarizer slider
//! - `MockRig` - All of the above, wired into an [`InstrumentRig`]
//!
//! Every mock counts the calls it receives and supports fault injection so
//! tests can check exactly what a run touched.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::config::RigSettings;
use crate::hardware::capabilities::{
    CameraMode, CameraModeControl, CaptureRouting, ExposureControl, FilterSlider, GainControl,
    Movable, Triggerable, WavelengthTunable,
};
use crate::hardware::rig::InstrumentRig;
use crate::hardware::router::CaptureRouter;
use crate::hardware::Frame;

// =============================================================================
// MockStage - Simulated Motion Stage / Rotation Mount
// =============================================================================

/// Mock motion stage with realistic timing
///
/// Simulates a positioner with:
/// - Configurable motion speed (units per second)
/// - Configurable settling time after motion
/// - Optional travel limits
/// - Fault injection for failing moves
pub struct MockStage {
    position: Arc<RwLock<f64>>,
    speed_per_sec: f64,
    settle: Duration,
    limits: Option<(f64, f64)>,
    fault: AtomicBool,
    move_count: AtomicU64,
}

impl MockStage {
    /// Create new mock linear stage at 0.0mm (10mm/sec, 50ms settle)
    pub fn new() -> Self {
        Self {
            position: Arc::new(RwLock::new(0.0)),
            speed_per_sec: 10.0,
            settle: Duration::from_millis(50),
            limits: None,
            fault: AtomicBool::new(false),
            move_count: AtomicU64::new(0),
        }
    }

    /// Create a rotation mount limited to 0-360 degrees.
    ///
    /// # Arguments
    /// * `speed_deg_per_sec` - Rotation speed
    /// * `settle` - Settling time after each move
    pub fn rotator(speed_deg_per_sec: f64, settle: Duration) -> Self {
        Self {
            speed_per_sec: speed_deg_per_sec,
            settle,
            limits: Some((0.0, 360.0)),
            ..Self::new()
        }
    }

    /// Create mock stage with custom speed
    pub fn with_speed(speed_per_sec: f64) -> Self {
        Self {
            speed_per_sec,
            ..Self::new()
        }
    }

    /// Make subsequent moves fail (or succeed again).
    pub fn set_fault(&self, fault: bool) {
        self.fault.store(fault, Ordering::SeqCst);
    }

    /// Number of move commands received.
    pub fn move_count(&self) -> u64 {
        self.move_count.load(Ordering::SeqCst)
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Movable for MockStage {
    async fn move_abs(&self, target: f64) -> Result<()> {
        self.move_count.fetch_add(1, Ordering::SeqCst);
        if self.fault.load(Ordering::SeqCst) {
            bail!("MockStage: injected motion fault");
        }
        if let Some((lo, hi)) = self.limits {
            if !(lo..=hi).contains(&target) {
                bail!("MockStage: target {target} outside travel {lo}..{hi}");
            }
        }

        let current = *self.position.read().await;
        let distance = (target - current).abs();
        let delay_ms = if self.speed_per_sec > 0.0 {
            (distance / self.speed_per_sec * 1000.0) as u64
        } else {
            0
        };

        trace!(from = current, to = target, delay_ms, "MockStage moving");

        // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
        sleep(Duration::from_millis(delay_ms)).await;

        *self.position.write().await = target;
        Ok(())
    }

    async fn move_rel(&self, distance: f64) -> Result<()> {
        let current = *self.position.read().await;
        self.move_abs(current + distance).await
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }

    async fn wait_settled(&self) -> Result<()> {
        sleep(self.settle).await;
        Ok(())
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera with software trigger and asynchronous frame delivery
///
/// Simulates a camera with:
/// - Configurable resolution
/// - Readout after `exposure + readout` delay, on a spawned task
/// - Frames delivered through the camera's [`CaptureRouter`]
/// - Optional frame dropping to simulate a lost completion signal
pub struct MockCamera {
    resolution: (u32, u32),
    readout: Duration,
    frame_count: Arc<AtomicU64>,
    trigger_count: AtomicU64,
    setting_count: AtomicU64,
    armed: RwLock<bool>,
    exposure_s: RwLock<f64>,
    gain: RwLock<f64>,
    mode: RwLock<CameraMode>,
    drop_frames: Arc<AtomicBool>,
    router: CaptureRouter,
}

impl MockCamera {
    /// Create new mock camera with specified resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            readout: Duration::from_millis(33),
            frame_count: Arc::new(AtomicU64::new(0)),
            trigger_count: AtomicU64::new(0),
            setting_count: AtomicU64::new(0),
            armed: RwLock::new(false),
            exposure_s: RwLock::new(0.1),
            gain: RwLock::new(1.0),
            mode: RwLock::new(CameraMode::Snapshot),
            drop_frames: Arc::new(AtomicBool::new(false)),
            router: CaptureRouter::default(),
        }
    }

    /// Override sensor readout time.
    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    /// Stop (or resume) delivering frames after a trigger.
    pub fn set_drop_frames(&self, drop_frames: bool) {
        self.drop_frames.store(drop_frames, Ordering::SeqCst);
    }

    /// Frames delivered so far.
    pub fn get_frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Triggers accepted so far.
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::SeqCst)
    }

    /// Exposure, gain and mode commands received so far.
    pub fn setting_count(&self) -> u64 {
        self.setting_count.load(Ordering::SeqCst)
    }

    /// Sensor resolution (width, height).
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

/// Test pattern: horizontal gradient offset by the frame number.
fn test_pattern(width: u32, height: u32, frame_num: u64) -> Vec<f32> {
    (0..height)
        .flat_map(|_| (0..width).map(move |x| (x as u64 * 16 + frame_num) as f32))
        .collect()
}

#[async_trait]
impl Triggerable for MockCamera {
    async fn arm(&self) -> Result<()> {
        *self.armed.write().await = true;
        Ok(())
    }

    async fn trigger(&self) -> Result<()> {
        if !*self.armed.read().await {
            bail!("MockCamera: Cannot trigger - not armed");
        }
        self.trigger_count.fetch_add(1, Ordering::SeqCst);

        let delay = Duration::from_secs_f64(*self.exposure_s.read().await) + self.readout;
        let (width, height) = self.resolution;
        let router = self.router.clone();
        let frame_count = Arc::clone(&self.frame_count);
        let drop_frames = Arc::clone(&self.drop_frames);

        tokio::spawn(async move {
            sleep(delay).await;
            if drop_frames.load(Ordering::SeqCst) {
                debug!("MockCamera: dropping frame");
                return;
            }
            let frame_num = frame_count.fetch_add(1, Ordering::SeqCst) + 1;
            match Frame::new(width, height, test_pattern(width, height, frame_num)) {
                Ok(frame) => router.deliver(frame),
                Err(e) => debug!(error = %e, "MockCamera: could not build frame"),
            }
        });

        Ok(())
    }
}

#[async_trait]
impl ExposureControl for MockCamera {
    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        self.setting_count.fetch_add(1, Ordering::SeqCst);
        if seconds <= 0.0 {
            return Err(anyhow!("MockCamera: Exposure must be positive"));
        }
        *self.exposure_s.write().await = seconds;
        Ok(())
    }

    async fn get_exposure(&self) -> Result<f64> {
        Ok(*self.exposure_s.read().await)
    }
}

#[async_trait]
impl GainControl for MockCamera {
    async fn set_gain(&self, gain: f64) -> Result<()> {
        self.setting_count.fetch_add(1, Ordering::SeqCst);
        if gain < 0.0 {
            return Err(anyhow!("MockCamera: Gain must not be negative"));
        }
        *self.gain.write().await = gain;
        Ok(())
    }

    async fn get_gain(&self) -> Result<f64> {
        Ok(*self.gain.read().await)
    }
}

#[async_trait]
impl CameraModeControl for MockCamera {
    async fn set_mode(&self, mode: CameraMode) -> Result<()> {
        self.setting_count.fetch_add(1, Ordering::SeqCst);
        let mut current = self.mode.write().await;
        if *current != mode {
            debug!(from = %*current, to = %mode, "MockCamera: switching mode");
            *current = mode;
        }
        Ok(())
    }

    async fn mode(&self) -> Result<CameraMode> {
        Ok(*self.mode.read().await)
    }
}

impl CaptureRouting for MockCamera {
    fn capture_router(&self) -> CaptureRouter {
        self.router.clone()
    }
}

// =============================================================================
// MockTunableFilter - Simulated LCTF
// =============================================================================

/// Mock liquid-crystal tunable filter
pub struct MockTunableFilter {
    range: (f64, f64),
    wavelength: RwLock<f64>,
    set_count: AtomicU64,
}

impl MockTunableFilter {
    /// Create a filter tunable over `[min_nm, max_nm]`, parked at `min_nm`.
    pub fn new(min_nm: f64, max_nm: f64) -> Self {
        Self {
            range: (min_nm, max_nm),
            wavelength: RwLock::new(min_nm),
            set_count: AtomicU64::new(0),
        }
    }

    /// Number of tuning commands received.
    pub fn set_count(&self) -> u64 {
        self.set_count.load(Ordering::SeqCst)
    }
}

impl Default for MockTunableFilter {
    fn default() -> Self {
        Self::new(420.0, 730.0)
    }
}

#[async_trait]
impl WavelengthTunable for MockTunableFilter {
    async fn set_wavelength(&self, nm: f64) -> Result<()> {
        self.set_count.fetch_add(1, Ordering::SeqCst);
        let (lo, hi) = self.range;
        if !(lo..=hi).contains(&nm) {
            bail!("MockTunableFilter: {nm} nm outside {lo}-{hi} nm");
        }
        *self.wavelength.write().await = nm;
        Ok(())
    }

    async fn wavelength(&self) -> Result<f64> {
        Ok(*self.wavelength.read().await)
    }

    async fn wavelength_range(&self) -> Result<(f64, f64)> {
        Ok(self.range)
    }
}

// =============================================================================
// MockFilterSlider - Simulated Polarizer Slider
// =============================================================================

/// Mock four-position slider
pub struct MockFilterSlider {
    position: RwLock<u8>,
    select_count: AtomicU64,
    fault: AtomicBool,
}

impl MockFilterSlider {
    /// Create a slider resting at position 1.
    pub fn new() -> Self {
        Self {
            position: RwLock::new(1),
            select_count: AtomicU64::new(0),
            fault: AtomicBool::new(false),
        }
    }

    /// Make subsequent selections fail (or succeed again).
    pub fn set_fault(&self, fault: bool) {
        self.fault.store(fault, Ordering::SeqCst);
    }

    /// Number of selection commands received.
    pub fn select_count(&self) -> u64 {
        self.select_count.load(Ordering::SeqCst)
    }
}

impl Default for MockFilterSlider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilterSlider for MockFilterSlider {
    async fn select_position(&self, position: u8) -> Result<()> {
        self.select_count.fetch_add(1, Ordering::SeqCst);
        if self.fault.load(Ordering::SeqCst) {
            bail!("MockFilterSlider: injected fault");
        }
        if position == 0 || position > self.position_count() {
            bail!("MockFilterSlider: no position {position}");
        }
        *self.position.write().await = position;
        Ok(())
    }

    async fn current_position(&self) -> Result<u8> {
        Ok(*self.position.read().await)
    }
}

// =============================================================================
// MockRig - Complete Simulated Rig
// =============================================================================

/// Concrete handles to every mock device of a rig.
///
/// Keep this around to inspect call counts or inject faults; hand
/// [`MockRig::rig`] to the code under test.
#[derive(Clone)]
pub struct MockRig {
    /// Camera
    pub camera: Arc<MockCamera>,
    /// Tunable optical filter
    pub tunable_filter: Arc<MockTunableFilter>,
    /// Analyzer rotator
    pub rotator_a: Arc<MockStage>,
    /// Generator rotator
    pub rotator_g: Arc<MockStage>,
    /// Polarizer slider
    pub filter_slider: Arc<MockFilterSlider>,
    /// Focus stage
    pub focus: Arc<MockStage>,
}

impl MockRig {
    /// Build a mock rig from rig settings.
    pub fn new(settings: &RigSettings) -> Self {
        let settle = Duration::from_millis(settings.settle_ms);
        Self {
            camera: Arc::new(
                MockCamera::new(settings.sensor_width, settings.sensor_height)
                    .with_readout(Duration::from_millis(settings.readout_ms)),
            ),
            tunable_filter: Arc::new(MockTunableFilter::new(
                settings.wavelength_min_nm,
                settings.wavelength_max_nm,
            )),
            rotator_a: Arc::new(MockStage::rotator(settings.rotator_speed_deg_per_sec, settle)),
            rotator_g: Arc::new(MockStage::rotator(settings.rotator_speed_deg_per_sec, settle)),
            filter_slider: Arc::new(MockFilterSlider::new()),
            focus: Arc::new(MockStage::new()),
        }
    }

    /// Small sensor and near-instant motion, for tests.
    pub fn fast() -> Self {
        Self::new(&RigSettings {
            sensor_width: 8,
            sensor_height: 6,
            wavelength_min_nm: 420.0,
            wavelength_max_nm: 730.0,
            readout_ms: 1,
            rotator_speed_deg_per_sec: 0.0,
            settle_ms: 0,
        })
    }

    /// The instrument set as seen by the executor.
    pub fn rig(&self) -> InstrumentRig {
        InstrumentRig::new(
            self.camera.clone(),
            self.tunable_filter.clone(),
            self.rotator_a.clone(),
            self.rotator_g.clone(),
            self.filter_slider.clone(),
            self.focus.clone(),
        )
    }

    /// Total configuration commands received by every device.
    pub fn configuration_calls(&self) -> u64 {
        self.tunable_filter.set_count()
            + self.rotator_a.move_count()
            + self.rotator_g.move_count()
            + self.filter_slider.select_count()
            + self.focus.move_count()
            + self.camera.trigger_count()
            + self.camera.setting_count()
    }
}
