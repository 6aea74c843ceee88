//! Atomic Hardware Capabilities
//!
//! Each device of the rig implements only the capabilities it actually has:
//!
//! - The camera: `Triggerable + ExposureControl + GainControl + CameraModeControl + CaptureRouting`
//! - The liquid-crystal tunable filter: `WavelengthTunable`
//! - The polarization rotators and the focus stage: `Movable`
//! - The polarizer slider: `FilterSlider`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn expose<C>(camera: &C, exposure_ms: f64) -> Result<()>
//! where
//!     C: ExposureControl + Triggerable,
//! {
//!     camera.set_exposure(exposure_ms / 1000.0).await?;
//!     camera.arm().await?;
//!     camera.trigger().await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::hardware::router::CaptureRouter;

/// Capability: Motion Control
///
/// Devices that can move to positions (rotation mounts, focus stages).
///
/// # Contract
/// - Positions are in device-native units (degrees for rotators, mm for stages)
/// - `move_abs` and `move_rel` initiate motion but may return before completion
/// - `wait_settled` blocks until motion completes
/// - `position` returns current position (may be approximate during motion)
///
/// # Thread Safety
/// - All methods are async and require `&self` (immutable reference)
/// - Interior mutability (Mutex/RwLock) should be used for state
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to absolute position
    ///
    /// # Returns
    /// - Ok(()) if motion initiated successfully
    /// - Err if position is out of range or hardware error
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Move relative to current position
    async fn move_rel(&self, distance: f64) -> Result<()>;

    /// Get current position
    async fn position(&self) -> Result<f64>;

    /// Wait for motion to settle
    ///
    /// Should have internal timeout to prevent infinite blocking.
    async fn wait_settled(&self) -> Result<()>;
}

/// Capability: Software Triggering
///
/// # Contract
/// - `arm()` prepares the device for a trigger
/// - `trigger()` starts one acquisition; completion is reported asynchronously
///   through the device's [`CaptureRouter`]
/// - Calling `trigger()` on an unarmed device returns Err
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Arm device for trigger
    async fn arm(&self) -> Result<()>;

    /// Send software trigger
    ///
    /// Returns once the trigger is accepted, not when the frame is read out.
    async fn trigger(&self) -> Result<()>;
}

/// Capability: Exposure Time Control
///
/// # Contract
/// - Exposure is in seconds (not milliseconds)
/// - Setting exposure does not start acquisition
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time in seconds
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Get current exposure setting in seconds
    async fn get_exposure(&self) -> Result<f64>;
}

/// Capability: Analog Gain Control
#[async_trait]
pub trait GainControl: Send + Sync {
    /// Set sensor gain
    async fn set_gain(&self, gain: f64) -> Result<()>;

    /// Get current sensor gain
    async fn get_gain(&self) -> Result<f64>;
}

/// Operating mode of the camera.
///
/// Interactive clients use `Snapshot` and `Live`; scripted runs switch to
/// `Acquisition` and hand the previous mode back when they finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    /// Single software-triggered frames for the interactive client
    Snapshot,
    /// Free-running preview stream
    Live,
    /// Software-triggered frames routed to a scripted run
    Acquisition,
}

impl std::fmt::Display for CameraMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraMode::Snapshot => write!(f, "Snapshot"),
            CameraMode::Live => write!(f, "Live"),
            CameraMode::Acquisition => write!(f, "Acquisition"),
        }
    }
}

/// Capability: Camera Mode Switching
#[async_trait]
pub trait CameraModeControl: Send + Sync {
    /// Switch operating mode. Switching to the current mode is a no-op.
    async fn set_mode(&self, mode: CameraMode) -> Result<()>;

    /// Current operating mode
    async fn mode(&self) -> Result<CameraMode>;
}

/// Capability: Capture-Complete Routing
///
/// Devices that report finished frames from their own execution context
/// expose the single-slot route those frames are delivered through.
pub trait CaptureRouting: Send + Sync {
    /// The device's completion route (shared handle)
    fn capture_router(&self) -> CaptureRouter;
}

/// Capability: Wavelength Tuning
///
/// Tunable optical filters (liquid-crystal tunable filters, AOTFs).
///
/// # Contract
/// - Wavelengths are in nanometres
/// - `wavelength_range` reports the inclusive range the device accepts
/// - `set_wavelength` outside that range returns Err
#[async_trait]
pub trait WavelengthTunable: Send + Sync {
    /// Tune to the given wavelength
    async fn set_wavelength(&self, nm: f64) -> Result<()>;

    /// Current wavelength
    async fn wavelength(&self) -> Result<f64>;

    /// Inclusive tunable range (min, max)
    async fn wavelength_range(&self) -> Result<(f64, f64)>;
}

/// Capability: Discrete Filter Positions
///
/// Sliders and wheels with positions numbered from 1.
#[async_trait]
pub trait FilterSlider: Send + Sync {
    /// Move to a position
    async fn select_position(&self, position: u8) -> Result<()>;

    /// Current position
    async fn current_position(&self) -> Result<u8>;

    /// Number of positions
    fn position_count(&self) -> u8 {
        4
    }
}

// =============================================================================
// Combined Traits (for trait objects)
// =============================================================================

/// Combined trait for the rig camera
///
/// Exists solely to enable trait objects; implement the individual traits and
/// get this automatically via the blanket impl.
pub trait Camera:
    Triggerable + ExposureControl + GainControl + CameraModeControl + CaptureRouting
{
}

impl<T> Camera for T where
    T: Triggerable + ExposureControl + GainControl + CameraModeControl + CaptureRouting
{
}
