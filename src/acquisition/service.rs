//! Control-layer entry point for scripted runs.
//!
//! [`AcquisitionService::run_acquisition`] is what the command channel calls
//! with the raw script text. It validates the script before any instrument is
//! touched, opens the archive under the configured data root and reports the
//! lifecycle through the notifier.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

use super::archive::{ArchiveReopen, ArchiveWriter};
use super::executor::AcquisitionExecutor;
use super::notifier::Notifier;
use super::script;
use crate::config::RunSettings;
use crate::error::AcqResult;
use crate::hardware::AcquisitionInstruments;

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier, also stored in the archive metadata
    pub run_id: Uuid,
    /// Script `VERSION` token
    pub version: Option<String>,
    /// Resolved archive location
    pub archive_path: PathBuf,
    /// Number of steps recorded
    pub steps_completed: usize,
}

/// Serves scripted acquisition requests, one at a time.
pub struct AcquisitionService {
    settings: RunSettings,
    notifier: Arc<dyn Notifier>,
    executor: Mutex<AcquisitionExecutor>,
}

impl AcquisitionService {
    /// Create a service driving `instruments`.
    pub fn new(
        instruments: Arc<dyn AcquisitionInstruments>,
        notifier: Arc<dyn Notifier>,
        settings: RunSettings,
    ) -> Self {
        let executor =
            AcquisitionExecutor::new(instruments, Arc::clone(&notifier), settings.capture_timeout());
        Self {
            settings,
            notifier,
            executor: Mutex::new(executor),
        }
    }

    /// Where a script's `path` header lands on disk.
    pub fn resolve_archive_path(&self, script_path: &str) -> PathBuf {
        resolve_under(&self.settings.data_root, script_path)
    }

    /// Reopen mode used for existing archives.
    pub fn archive_reopen(&self) -> ArchiveReopen {
        self.settings.archive_reopen
    }

    /// Parse, validate and run a script.
    ///
    /// Script errors return before any notification, instrument call or
    /// archive access. Requests are serialized: a second call waits for the
    /// running one to finish.
    #[instrument(skip_all, name = "run_acquisition")]
    pub async fn run_acquisition(&self, script_text: &str) -> AcqResult<RunReport> {
        let script = script::parse(script_text)?;
        let archive_path = self.resolve_archive_path(&script.descriptor.path);
        let run_id = Uuid::new_v4();

        let mut executor = self.executor.lock().await;
        info!(%run_id, path = %archive_path.display(), steps = script.steps.len(), "Starting acquisition");
        self.notifier.notify("Starting acquisition...");

        let result = match ArchiveWriter::open(&archive_path, self.settings.archive_reopen) {
            Ok(archive) => executor.run(run_id, &script, archive).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.notifier.notify("Acquisition DONE!");
                Ok(RunReport {
                    run_id,
                    version: script.version.clone(),
                    archive_path,
                    steps_completed: executor.status().steps_completed,
                })
            }
            Err(e) => {
                self.notifier.notify(&format!("Acquisition FAILED: {e}"));
                Err(e)
            }
        }
    }
}

fn resolve_under(root: &Path, script_path: &str) -> PathBuf {
    let path = Path::new(script_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_land_under_the_data_root() {
        assert_eq!(
            resolve_under(Path::new("/data"), "out/run1.zip"),
            PathBuf::from("/data/out/run1.zip")
        );
        assert_eq!(
            resolve_under(Path::new("/data"), "/abs/run.zip"),
            PathBuf::from("/abs/run.zip")
        );
    }
}
