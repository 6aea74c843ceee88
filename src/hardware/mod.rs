//! Instrument layer of the rig.
//!
//! - [`capabilities`]: fine-grained async traits the drivers implement
//! - [`router`]: single-slot capture-completion routing owned by the camera
//! - [`rig`]: the composed instrument set the executor drives
//! - [`mock`]: simulated devices for tests and dry runs

pub mod capabilities;
pub mod mock;
pub mod rig;
pub mod router;

pub use rig::{AcquisitionInstruments, InstrumentRig};
pub use router::{CaptureRouter, FrameSink, RouteGuard};

use anyhow::{bail, Result};

/// A single 2-D camera sample, stored row-major as 32-bit floats.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel values, `width * height` long
    pub data: Vec<f32>,
}

impl Frame {
    /// Create a frame, checking that the buffer matches the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            bail!(
                "Frame data size mismatch: expected {} pixels for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert 16-bit sensor counts to a float frame.
    pub fn from_u16(width: u32, height: u32, pixels: &[u16]) -> Result<Self> {
        Self::new(width, height, pixels.iter().map(|&p| f32::from(p)).collect())
    }

    /// Smallest and largest finite pixel values, or `None` if there are none.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
