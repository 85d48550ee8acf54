//! Download step: one downloader child per batch

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::Result;
use crate::process::{ChildProcess, ProcessRegistry};
use crate::tools;
use crate::types::{BatchId, Event, LogLine, LogSource, ProcessState};
use crate::utils;

/// What the download step left behind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    /// Terminal state of the downloader
    pub state: ProcessState,
    /// Regular files present in the output directory afterwards
    pub files: Vec<PathBuf>,
}

/// Spawns the downloader and forwards its output
pub struct DownloadCoordinator {
    downloader: PathBuf,
    registry: Arc<ProcessRegistry>,
    event_tx: broadcast::Sender<Event>,
    batch: BatchId,
}

impl DownloadCoordinator {
    /// Create a coordinator spawning `downloader` into `registry`
    pub fn new(
        downloader: impl Into<PathBuf>,
        registry: Arc<ProcessRegistry>,
        event_tx: broadcast::Sender<Event>,
        batch: BatchId,
    ) -> Self {
        Self {
            downloader: downloader.into(),
            registry,
            event_tx,
            batch,
        }
    }

    /// Download `url` into `output_dir`
    ///
    /// Every output line is emitted in order as a [`LogSource::Download`] log
    /// event. Files already written stay in place whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`](crate::Error::Launch) if the downloader could
    /// not be started. A non-zero or killed exit is reported in the returned
    /// [`DownloadReport`], not as an error.
    pub async fn run(&self, url: &str, output_dir: &Path) -> Result<DownloadReport> {
        let command = tools::download_command(&self.downloader, url, output_dir);
        let label = command.program_name();
        let mut child = ChildProcess::spawn(command, label.clone(), &self.registry)?;

        tracing::info!(
            batch_id = %self.batch,
            url,
            pid = ?child.handle().pid(),
            "download started"
        );
        self.emit(Event::DownloadStarted {
            batch: self.batch,
            url: url.to_string(),
            pid: child.handle().pid(),
        });

        loop {
            match child.next_line().await {
                Ok(Some(line)) => self.log(line),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(batch_id = %self.batch, error = %e, "lost downloader output");
                    self.log(format!("Download error: {}", e));
                    break;
                }
            }
        }

        let state = child.wait().await;
        if let Err(e) = state.check(&label) {
            tracing::warn!(batch_id = %self.batch, error = %e, "downloader did not succeed");
        }

        // Best effort: a listing failure leaves the file list empty
        let files = match utils::list_files(output_dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(
                    batch_id = %self.batch,
                    dir = ?output_dir,
                    error = %e,
                    "failed to list output directory"
                );
                Vec::new()
            }
        };

        tracing::info!(
            batch_id = %self.batch,
            state = ?state,
            files = files.len(),
            "download finished"
        );
        self.emit(Event::DownloadFinished {
            batch: self.batch,
            state,
            files: files.len(),
        });

        Ok(DownloadReport { state, files })
    }

    fn log(&self, text: impl Into<String>) {
        self.emit(Event::Log {
            batch: self.batch,
            line: LogLine::new(LogSource::Download, text),
        });
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
