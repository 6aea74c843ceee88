//! Scripted acquisition runs.
//!
//! # Overview
//!
//! A run starts from untrusted script text and ends with a sealed archive:
//!
//! ```text
//! script text ─► script::parse ─► AcquisitionScript
//!                                     │
//!                 AcquisitionExecutor ◄┘ ──► instruments (configure, trigger)
//!                     │    ▲
//!                     │    └── CaptureSynchronizer ◄── camera completion context
//!                     ▼                                   │
//!                ArchiveWriter ◄──── CaptureHandler ◄─────┘
//! ```
//!
//! - [`model`]: descriptor, steps and the metadata document
//! - [`script`]: parser, validator and canonical renderer
//! - [`archive`]: ZIP archive writer and reader
//! - [`capture`]: single-slot capture handshake
//! - [`executor`]: the step sequencer
//! - [`notifier`]: progress reporting
//! - [`service`]: control-layer entry point

pub mod archive;
pub mod capture;
pub mod executor;
pub mod model;
pub mod notifier;
pub mod script;
pub mod service;

pub use archive::{ArchiveReader, ArchiveReopen, ArchiveWriter};
pub use capture::{CaptureSynchronizer, CaptureTicket, SlotState};
pub use executor::{AcquisitionExecutor, CaptureHandler, ExecutorStatus, RunPhase};
pub use model::{AcquisitionScript, Descriptor, FilterCode, RunMetadata, Step};
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier};
pub use service::{AcquisitionService, RunReport};
