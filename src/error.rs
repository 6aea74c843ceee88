//! Custom error types for the acquisition subsystem.
//!
//! This module defines `AcquisitionError`, the single error type surfaced by
//! the parser, the archive writer, the capture synchronizer and the executor.
//! Using the `thiserror` crate, it keeps every failure of a run in one enum so
//! the control layer can decide how to present it.
//!
//! ## Error Hierarchy
//!
//! - **`ScriptSyntax`**: a malformed directive, header or step line.
//! - **`ScriptValidation`**: a header missing required fields, or a step count
//!   that differs from the declared `num_steps`.
//! - **`StepField`**: a step field that fails numeric coercion, a range check or
//!   the filter-code membership check. Carries the offending literal.
//! - **`DeviceConfig`**: an instrument collaborator rejected a configuration
//!   call. The driver's own `anyhow::Error` is kept as the source.
//! - **`CaptureTimeout`**: no capture-complete signal arrived within the bound.
//! - **`ArchiveIo`**: storage failure while opening, writing or sealing the
//!   archive.
//!
//! Instrument drivers speak `anyhow::Result` (see [`crate::hardware::capabilities`]);
//! the executor wraps those failures into `DeviceConfig` with the step they
//! belong to.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the acquisition error type.
pub type AcqResult<T> = std::result::Result<T, AcquisitionError>;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Script syntax error at line {line}: {message}")]
    ScriptSyntax { line: usize, message: String },

    #[error("Script validation error: {0}")]
    ScriptValidation(String),

    #[error("Invalid {field} '{literal}' in step line {line}: {reason}")]
    StepField {
        line: usize,
        field: &'static str,
        literal: String,
        reason: String,
    },

    #[error("Device configuration failed at step {step}: {source:#}")]
    DeviceConfig {
        step: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Wavelength {wavelength_nm} nm at step {step} is outside the tunable range [{min_nm}, {max_nm}] nm")]
    WavelengthOutOfRange {
        step: usize,
        wavelength_nm: f64,
        min_nm: f64,
        max_nm: f64,
    },

    #[error("No capture completion for step {step} within {timeout:?}")]
    CaptureTimeout { step: usize, timeout: Duration },

    #[error("Capture slot busy: step {pending} has not completed")]
    CaptureBusy { pending: usize },

    #[error("Capture routing is held by another run")]
    RoutingBusy,

    #[error("Archive I/O error while {operation}: {source}")]
    ArchiveIo {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AcquisitionError {
    /// Build an `ArchiveIo` error for the given operation.
    pub fn archive_io<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        AcquisitionError::ArchiveIo {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Errors raised while reading the script, before any instrument is touched.
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            AcquisitionError::ScriptSyntax { .. }
                | AcquisitionError::ScriptValidation(_)
                | AcquisitionError::StepField { .. }
        )
    }
}

impl From<figment::Error> for AcquisitionError {
    fn from(value: figment::Error) -> Self {
        AcquisitionError::Config(value.to_string())
    }
}
