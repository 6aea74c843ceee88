//! The composed instrument set driven by scripted runs.
//!
//! [`AcquisitionInstruments`] is the contract the executor consumes.
//! [`InstrumentRig`] implements it on top of the individual capability trait
//! objects, so the same rig is shared with interactive control.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::acquisition::model::FilterCode;
use crate::hardware::capabilities::{Camera, CameraMode, FilterSlider, Movable, WavelengthTunable};
use crate::hardware::router::CaptureRouter;

/// Instrument operations a scripted run needs.
#[async_trait]
pub trait AcquisitionInstruments: Send + Sync {
    /// Tunable range of the optical filter, in nm.
    async fn wavelength_range(&self) -> Result<(f64, f64)>;

    /// Tune the optical filter.
    async fn configure_optics(&self, wavelength_nm: f64) -> Result<()>;

    /// Set camera integration time (ms) and gain.
    async fn configure_camera(&self, exposure_ms: f64, gain: f64) -> Result<()>;

    /// Move both polarization rotators and wait for them to settle.
    async fn configure_rotators(&self, angle_a_deg: f64, angle_g_deg: f64) -> Result<()>;

    /// Select the filter slider position.
    async fn configure_filter(&self, code: FilterCode) -> Result<()>;

    /// Start one capture. Completion arrives through [`Self::capture_router`].
    async fn trigger_capture(&self) -> Result<()>;

    /// Current camera mode.
    async fn camera_mode(&self) -> Result<CameraMode>;

    /// Switch camera mode.
    async fn set_camera_mode(&self, mode: CameraMode) -> Result<()>;

    /// Completion route of the capture-capable instrument.
    fn capture_router(&self) -> CaptureRouter;
}

/// Camera, tunable filter, two rotators, filter slider and focus stage.
#[derive(Clone)]
pub struct InstrumentRig {
    camera: Arc<dyn Camera>,
    tunable_filter: Arc<dyn WavelengthTunable>,
    rotator_a: Arc<dyn Movable>,
    rotator_g: Arc<dyn Movable>,
    filter_slider: Arc<dyn FilterSlider>,
    focus: Arc<dyn Movable>,
}

impl InstrumentRig {
    /// Assemble a rig from its devices.
    pub fn new(
        camera: Arc<dyn Camera>,
        tunable_filter: Arc<dyn WavelengthTunable>,
        rotator_a: Arc<dyn Movable>,
        rotator_g: Arc<dyn Movable>,
        filter_slider: Arc<dyn FilterSlider>,
        focus: Arc<dyn Movable>,
    ) -> Self {
        Self {
            camera,
            tunable_filter,
            rotator_a,
            rotator_g,
            filter_slider,
            focus,
        }
    }

    /// Focus stage. Scripted runs record z-positions but do not move it.
    pub fn focus(&self) -> &Arc<dyn Movable> {
        &self.focus
    }
}

#[async_trait]
impl AcquisitionInstruments for InstrumentRig {
    async fn wavelength_range(&self) -> Result<(f64, f64)> {
        self.tunable_filter
            .wavelength_range()
            .await
            .context("tunable filter range query failed")
    }

    async fn configure_optics(&self, wavelength_nm: f64) -> Result<()> {
        debug!(wavelength_nm, "Tuning optical filter");
        self.tunable_filter
            .set_wavelength(wavelength_nm)
            .await
            .with_context(|| format!("tunable filter rejected {wavelength_nm} nm"))
    }

    async fn configure_camera(&self, exposure_ms: f64, gain: f64) -> Result<()> {
        debug!(exposure_ms, gain, "Configuring camera");
        self.camera
            .set_exposure(exposure_ms / 1000.0)
            .await
            .with_context(|| format!("camera rejected exposure {exposure_ms} ms"))?;
        self.camera
            .set_gain(gain)
            .await
            .with_context(|| format!("camera rejected gain {gain}"))
    }

    async fn configure_rotators(&self, angle_a_deg: f64, angle_g_deg: f64) -> Result<()> {
        debug!(angle_a_deg, angle_g_deg, "Moving polarization rotators");
        let move_a = async {
            self.rotator_a
                .move_abs(angle_a_deg)
                .await
                .context("rotator A move failed")?;
            self.rotator_a
                .wait_settled()
                .await
                .context("rotator A did not settle")
        };
        let move_g = async {
            self.rotator_g
                .move_abs(angle_g_deg)
                .await
                .context("rotator G move failed")?;
            self.rotator_g
                .wait_settled()
                .await
                .context("rotator G did not settle")
        };
        tokio::try_join!(move_a, move_g)?;
        Ok(())
    }

    async fn configure_filter(&self, code: FilterCode) -> Result<()> {
        debug!(filter = %code, "Selecting filter position");
        self.filter_slider
            .select_position(code.position())
            .await
            .with_context(|| format!("filter slider rejected position {code}"))
    }

    async fn trigger_capture(&self) -> Result<()> {
        self.camera.arm().await.context("camera arm failed")?;
        self.camera.trigger().await.context("camera trigger failed")
    }

    async fn camera_mode(&self) -> Result<CameraMode> {
        self.camera.mode().await
    }

    async fn set_camera_mode(&self, mode: CameraMode) -> Result<()> {
        self.camera
            .set_mode(mode)
            .await
            .with_context(|| format!("camera refused {mode} mode"))
    }

    fn capture_router(&self) -> CaptureRouter {
        self.camera.capture_router()
    }
}
