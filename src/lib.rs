//! # Spectropol DAQ Core Library
//!
//! Scripted, unattended acquisition runs for a hyperspectral polarimetry rig:
//! a camera behind a liquid-crystal tunable filter, two polarization rotators,
//! a polarizer slider and a focus stage.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The script parser and validator, the run data model,
//!   the archive writer, the capture synchronizer, the step sequencer and the
//!   control-layer service built on them.
//! - **`hardware`**: Fine-grained async capability traits, the composed
//!   instrument rig, capture-completion routing and mock devices.
//! - **`config`**: Figment-based configuration (`config/acquisition.toml` plus
//!   `SPECTROPOL_` environment overrides).
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: The `AcquisitionError` enum shared by every layer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spectropol_daq::acquisition::{AcquisitionService, TracingNotifier};
//! use spectropol_daq::config::AcquisitionConfig;
//! use spectropol_daq::hardware::mock::MockRig;
//! use std::sync::Arc;
//!
//! let config = AcquisitionConfig::load()?;
//! let mock = MockRig::new(&config.rig);
//! let service = AcquisitionService::new(
//!     Arc::new(mock.rig()),
//!     Arc::new(TracingNotifier),
//!     config.acquisition.clone(),
//! );
//! let report = service.run_acquisition(&script_text).await?;
//! ```

pub mod acquisition;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;

pub use error::{AcqResult, AcquisitionError};
