//! Progress notifications for the control channel.

use parking_lot::Mutex;
use tracing::info;

/// Fire-and-forget progress sink.
pub trait Notifier: Send + Sync {
    /// Report one progress message.
    fn notify(&self, text: &str);
}

/// Emits each message as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, text: &str) {
        info!(target: "spectropol_daq::progress", message = text);
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far, in order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, text: &str) {
        (**self).notify(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn recorder_keeps_order() {
        let recorder = Arc::new(RecordingNotifier::new());
        let shared: Arc<dyn Notifier> = recorder.clone();
        shared.notify("0: OK");
        shared.notify("1: OK");
        assert_eq!(recorder.messages(), vec!["0: OK", "1: OK"]);
    }
}
