//! Capture-completion routing.
//!
//! A camera delivers finished frames from its own execution context to
//! whichever [`FrameSink`] currently occupies its single routing slot.
//! Interactive control installs a preview sink; a scripted run takes the slot
//! for its whole duration through [`CaptureRouter::acquire`] and the returned
//! [`RouteGuard`] puts the previous sink back when dropped, on every exit path.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{AcqResult, AcquisitionError};
use crate::hardware::Frame;

/// Receiver of capture-complete notifications.
///
/// Called from the camera's completion context, never from the sequencer.
pub trait FrameSink: Send + Sync {
    /// Handle one finished frame.
    fn on_capture_complete(&self, frame: Frame);
}

/// Sink that drops frames. Default route when nobody is listening.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl FrameSink for DiscardSink {
    fn on_capture_complete(&self, frame: Frame) {
        trace!(width = frame.width, height = frame.height, "Discarding frame");
    }
}

struct RouteState {
    sink: Arc<dyn FrameSink>,
    held: bool,
}

/// Shared handle to a device's completion slot.
#[derive(Clone)]
pub struct CaptureRouter {
    state: Arc<Mutex<RouteState>>,
}

impl CaptureRouter {
    /// Create a router with the given default sink.
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RouteState { sink, held: false })),
        }
    }

    /// Replace the interactive sink.
    ///
    /// Fails while a run holds the route.
    pub fn set_sink(&self, sink: Arc<dyn FrameSink>) -> AcqResult<()> {
        let mut state = self.state.lock();
        if state.held {
            return Err(AcquisitionError::RoutingBusy);
        }
        state.sink = sink;
        Ok(())
    }

    /// Take exclusive ownership of the route until the guard is dropped.
    pub fn acquire(&self, sink: Arc<dyn FrameSink>) -> AcqResult<RouteGuard> {
        let mut state = self.state.lock();
        if state.held {
            return Err(AcquisitionError::RoutingBusy);
        }
        let previous = std::mem::replace(&mut state.sink, sink);
        state.held = true;
        debug!("Capture route acquired");
        Ok(RouteGuard {
            router: self.clone(),
            previous: Some(previous),
        })
    }

    /// Whether a run currently owns the route.
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Deliver a finished frame to the current sink.
    ///
    /// The sink runs outside the routing lock so it may take as long as it
    /// needs without blocking a concurrent acquire or release.
    pub fn deliver(&self, frame: Frame) {
        let sink = Arc::clone(&self.state.lock().sink);
        sink.on_capture_complete(frame);
    }
}

impl Default for CaptureRouter {
    fn default() -> Self {
        Self::new(Arc::new(DiscardSink))
    }
}

/// Ownership token for a held route.
#[must_use = "dropping the guard releases the capture route immediately"]
pub struct RouteGuard {
    router: CaptureRouter,
    previous: Option<Arc<dyn FrameSink>>,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let mut state = self.router.state.lock();
            state.sink = previous;
            state.held = false;
            debug!("Capture route restored");
        }
    }
}
