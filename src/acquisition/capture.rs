//! Capture Synchronizer
//!
//! Single-slot handshake between the camera's completion context and the
//! sequencer.
//!
//! ```text
//!        arm()                complete()              wait()
//! Idle ─────────► Pending ─────────────► Complete ─────────► Idle
//!                    │                                         ▲
//!                    └──────── timeout / cancel ───────────────┘
//! ```
//!
//! The completion side persists the frame (raw, then preview) while holding
//! the slot lock, and only then signals the waiter. A successful
//! [`CaptureSynchronizer::wait`] therefore means the step's data is recorded.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{AcqResult, AcquisitionError};
use crate::hardware::Frame;

/// Observable slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No request outstanding
    Idle,
    /// Waiting for the frame of the given step position
    Pending(usize),
    /// Frame of the given step position persisted, not yet observed
    Complete(usize),
}

enum Slot {
    Idle,
    Pending {
        position: usize,
        signal: oneshot::Sender<AcqResult<()>>,
    },
    Complete {
        position: usize,
    },
}

/// Handle for one armed request, consumed by [`CaptureSynchronizer::wait`].
#[derive(Debug)]
#[must_use = "an armed capture must be awaited or cancelled"]
pub struct CaptureTicket {
    position: usize,
    done: oneshot::Receiver<AcqResult<()>>,
}

impl CaptureTicket {
    /// Step position this ticket waits for.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// The synchronizer. Created per run.
pub struct CaptureSynchronizer {
    slot: Mutex<Slot>,
}

impl Default for CaptureSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSynchronizer {
    /// New synchronizer in `Idle`.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Current state.
    pub fn state(&self) -> SlotState {
        match &*self.slot.lock() {
            Slot::Idle => SlotState::Idle,
            Slot::Pending { position, .. } => SlotState::Pending(*position),
            Slot::Complete { position } => SlotState::Complete(*position),
        }
    }

    /// Open a request for the step at `position`.
    ///
    /// Only allowed from `Idle`; a request that is still pending or not yet
    /// observed yields `CaptureBusy`.
    pub fn arm(&self, position: usize) -> AcqResult<CaptureTicket> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Idle => {}
            Slot::Pending { position: pending, .. } | Slot::Complete { position: pending } => {
                return Err(AcquisitionError::CaptureBusy { pending: *pending });
            }
        }
        let (signal, done) = oneshot::channel();
        *slot = Slot::Pending { position, signal };
        debug!(position, "Capture armed");
        Ok(CaptureTicket { position, done })
    }

    /// Completion-context entry point.
    ///
    /// Runs `persist` for the pending step under the slot lock, moves the slot
    /// to `Complete` and wakes the waiter with the persist result. Frames that
    /// arrive with nothing pending are dropped.
    pub fn complete<F>(&self, frame: Frame, persist: F)
    where
        F: FnOnce(usize, &Frame) -> AcqResult<()>,
    {
        let mut slot = self.slot.lock();
        let (position, signal) = match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Pending { position, signal } => (position, signal),
            other => {
                *slot = other;
                warn!(
                    width = frame.width,
                    height = frame.height,
                    "Unsolicited frame dropped"
                );
                return;
            }
        };

        let result = persist(position, &frame);
        *slot = Slot::Complete { position };
        drop(slot);

        if signal.send(result).is_err() {
            debug!(position, "Capture waiter already gone");
        }
    }

    /// Wait for the ticket's completion, bounded by `timeout`.
    ///
    /// On success or persist failure the slot returns to `Idle`. On timeout the
    /// request is abandoned, the slot returns to `Idle`, and
    /// `CaptureTimeout` is returned.
    pub async fn wait(&self, ticket: CaptureTicket, timeout: Duration) -> AcqResult<()> {
        let CaptureTicket { position, done } = ticket;
        let outcome = tokio::time::timeout(timeout, done).await;
        self.release(position);

        match outcome {
            Ok(Ok(persisted)) => {
                debug!(position, "Capture observed");
                persisted
            }
            // Completion context went away without reporting a persist result.
            Ok(Err(_)) => {
                warn!(position, "Capture completion ended without a result");
                Err(AcquisitionError::archive_io(
                    format!("persisting step {position}"),
                    "capture completion ended without a result",
                ))
            }
            Err(_) => {
                warn!(position, ?timeout, "Capture timed out");
                Err(AcquisitionError::CaptureTimeout {
                    step: position,
                    timeout,
                })
            }
        }
    }

    /// Abandon an armed request that will never be triggered.
    pub fn cancel(&self, ticket: CaptureTicket) {
        self.release(ticket.position);
    }

    fn release(&self, position: usize) {
        let mut slot = self.slot.lock();
        let ours = match &*slot {
            Slot::Pending { position: p, .. } | Slot::Complete { position: p } => *p == position,
            Slot::Idle => false,
        };
        if ours {
            *slot = Slot::Idle;
        }
    }
}
