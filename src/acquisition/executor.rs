//! Step sequencer for scripted acquisition runs.
//!
//! The executor drives a validated script against the instrument set:
//!
//! ```text
//! Init → ArchiveOpen → MetadataWritten
//!      → per step { Configure → Trigger → AwaitCapture → Report }
//!      → Cleanup → Done | Failed
//! ```
//!
//! For the whole run it owns the camera's capture route (through a
//! [`RouteGuard`](crate::hardware::RouteGuard)) and keeps the camera in
//! [`CameraMode::Acquisition`]. Frames arrive on the camera's completion
//! context and are persisted by [`CaptureHandler`] before the sequencer is
//! released. The first error aborts the remaining steps; the archive is sealed
//! on every exit path.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::archive::ArchiveWriter;
use super::capture::CaptureSynchronizer;
use super::model::{AcquisitionScript, RunMetadata, Step};
use super::notifier::Notifier;
use crate::error::{AcqResult, AcquisitionError};
use crate::hardware::capabilities::CameraMode;
use crate::hardware::{AcquisitionInstruments, Frame, FrameSink};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No run started yet
    Idle,
    /// Run accepted, nothing touched
    Init,
    /// Archive handed to the executor
    ArchiveOpen,
    /// Metadata document stored
    MetadataWritten,
    /// Pushing a step's settings to the instruments
    Configure,
    /// Arming and triggering the capture
    Trigger,
    /// Waiting for the capture-complete signal
    AwaitCapture,
    /// Reporting a completed step
    Report,
    /// Sealing the archive
    Cleanup,
    /// All steps completed and archive sealed
    Done,
    /// Run aborted; see `last_error`
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "Idle",
            RunPhase::Init => "Init",
            RunPhase::ArchiveOpen => "ArchiveOpen",
            RunPhase::MetadataWritten => "MetadataWritten",
            RunPhase::Configure => "Configure",
            RunPhase::Trigger => "Trigger",
            RunPhase::AwaitCapture => "AwaitCapture",
            RunPhase::Report => "Report",
            RunPhase::Cleanup => "Cleanup",
            RunPhase::Done => "Done",
            RunPhase::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Executor status, for inspection after (or during) a run.
#[derive(Debug, Clone)]
pub struct ExecutorStatus {
    /// Current phase
    pub phase: RunPhase,
    /// Identifier of the current or last run
    pub run_id: Option<Uuid>,
    /// Steps whose data is recorded
    pub steps_completed: usize,
    /// Message of the error that ended the last run
    pub last_error: Option<String>,
}

impl Default for ExecutorStatus {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            run_id: None,
            steps_completed: 0,
            last_error: None,
        }
    }
}

/// Completion-context sink installed on the camera route for a run.
///
/// Persists each frame (raw, then preview) at the pending step position and
/// then releases the sequencer.
pub struct CaptureHandler {
    sync: Arc<CaptureSynchronizer>,
    archive: Arc<Mutex<ArchiveWriter>>,
}

impl CaptureHandler {
    /// Handler writing into `archive` for requests armed on `sync`.
    pub fn new(sync: Arc<CaptureSynchronizer>, archive: Arc<Mutex<ArchiveWriter>>) -> Self {
        Self { sync, archive }
    }
}

impl FrameSink for CaptureHandler {
    fn on_capture_complete(&self, frame: Frame) {
        let archive = &self.archive;
        self.sync.complete(frame, |position, frame| {
            let mut archive = archive.lock();
            archive.write_raw(position, frame)?;
            archive.write_preview(position, frame)
        });
    }
}

/// Runs validated scripts against an instrument set.
pub struct AcquisitionExecutor {
    instruments: Arc<dyn AcquisitionInstruments>,
    notifier: Arc<dyn Notifier>,
    capture_timeout: Duration,
    status: ExecutorStatus,
}

impl AcquisitionExecutor {
    /// Create an executor.
    ///
    /// # Arguments
    ///
    /// * `instruments` - Instrument set borrowed for each run
    /// * `notifier` - Progress sink
    /// * `capture_timeout` - Bound on each capture wait
    pub fn new(
        instruments: Arc<dyn AcquisitionInstruments>,
        notifier: Arc<dyn Notifier>,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            instruments,
            notifier,
            capture_timeout,
            status: ExecutorStatus::default(),
        }
    }

    /// Status of the current or last run.
    pub fn status(&self) -> ExecutorStatus {
        self.status.clone()
    }

    fn set_phase(&mut self, phase: RunPhase) {
        debug!(from = %self.status.phase, to = %phase, "Run phase");
        self.status.phase = phase;
    }

    /// Execute every step of `script`, writing into `archive`.
    ///
    /// Returns the first error. The archive is closed before this returns,
    /// whatever the outcome, and data of completed steps stays in it.
    pub async fn run(
        &mut self,
        run_id: Uuid,
        script: &AcquisitionScript,
        archive: ArchiveWriter,
    ) -> AcqResult<()> {
        self.status = ExecutorStatus {
            run_id: Some(run_id),
            ..ExecutorStatus::default()
        };
        self.set_phase(RunPhase::Init);

        let span = info_span!(
            "acquisition_run",
            %run_id,
            project = %script.descriptor.project,
            experiment = %script.descriptor.experiment,
            steps = script.steps.len(),
        );

        async move {
            let archive = Arc::new(Mutex::new(archive));
            self.set_phase(RunPhase::ArchiveOpen);

            let outcome = self.execute(run_id, script, &archive).await;

            self.set_phase(RunPhase::Cleanup);
            let closed = archive.lock().close();

            let result = match (outcome, closed) {
                (Ok(()), closed) => closed,
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(close_err)) => {
                    warn!(error = %close_err, "Archive close failed after run error");
                    Err(e)
                }
            };

            match &result {
                Ok(()) => {
                    self.set_phase(RunPhase::Done);
                    info!(steps = self.status.steps_completed, "Run complete");
                }
                Err(e) => {
                    self.status.last_error = Some(e.to_string());
                    self.set_phase(RunPhase::Failed);
                    error!(
                        error = %e,
                        steps_completed = self.status.steps_completed,
                        "Run aborted"
                    );
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &mut self,
        run_id: Uuid,
        script: &AcquisitionScript,
        archive: &Arc<Mutex<ArchiveWriter>>,
    ) -> AcqResult<()> {
        archive
            .lock()
            .write_metadata(&RunMetadata::new(run_id, script))?;
        self.set_phase(RunPhase::MetadataWritten);

        let sync = Arc::new(CaptureSynchronizer::new());
        let handler = Arc::new(CaptureHandler::new(Arc::clone(&sync), Arc::clone(archive)));
        let _route = self.instruments.capture_router().acquire(handler)?;

        let previous_mode = self
            .instruments
            .camera_mode()
            .await
            .map_err(|source| AcquisitionError::DeviceConfig { step: 0, source })?;
        self.instruments
            .set_camera_mode(CameraMode::Acquisition)
            .await
            .map_err(|source| AcquisitionError::DeviceConfig { step: 0, source })?;

        let outcome = self.execute_steps(script, &sync).await;

        let restored = self.instruments.set_camera_mode(previous_mode).await;
        if let Err(e) = &restored {
            warn!(mode = %previous_mode, error = %e, "Could not restore camera mode");
        }
        outcome?;
        restored.map_err(|source| AcquisitionError::DeviceConfig {
            step: self.status.steps_completed,
            source,
        })
    }

    async fn execute_steps(
        &mut self,
        script: &AcquisitionScript,
        sync: &CaptureSynchronizer,
    ) -> AcqResult<()> {
        for (position, step) in script.steps.iter().enumerate() {
            self.set_phase(RunPhase::Configure);
            self.configure(position, step).await?;
            self.notifier.notify(&step.to_string());

            self.set_phase(RunPhase::Trigger);
            let ticket = sync.arm(position)?;
            if let Err(source) = self.instruments.trigger_capture().await {
                sync.cancel(ticket);
                return Err(AcquisitionError::DeviceConfig {
                    step: position,
                    source,
                });
            }

            self.set_phase(RunPhase::AwaitCapture);
            sync.wait(ticket, self.capture_timeout).await?;

            self.set_phase(RunPhase::Report);
            self.status.steps_completed = position + 1;
            info!(position, step = step.index, "Step recorded");
            self.notifier.notify(&format!("{position}: OK"));
        }
        Ok(())
    }

    async fn configure(&self, position: usize, step: &Step) -> AcqResult<()> {
        let device = |source: anyhow::Error| AcquisitionError::DeviceConfig {
            step: position,
            source,
        };

        let (min_nm, max_nm) = self.instruments.wavelength_range().await.map_err(device)?;
        if !(min_nm..=max_nm).contains(&step.wavelength_nm) {
            return Err(AcquisitionError::WavelengthOutOfRange {
                step: position,
                wavelength_nm: step.wavelength_nm,
                min_nm,
                max_nm,
            });
        }

        self.instruments
            .configure_optics(step.wavelength_nm)
            .await
            .map_err(device)?;
        self.instruments
            .configure_camera(step.integration_ms, step.gain)
            .await
            .map_err(device)?;
        self.instruments
            .configure_rotators(step.angle_a_deg, step.angle_g_deg)
            .await
            .map_err(device)?;
        self.instruments
            .configure_filter(step.filter)
            .await
            .map_err(device)?;
        // Focus stays where the operator left it.
        debug!(z_position_mm = step.z_position_mm, "z-position recorded only");
        Ok(())
    }
}
