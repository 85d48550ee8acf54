//! Batch flow: download, then convert what was downloaded.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::conversion::ConversionScheduler;
use crate::download::DownloadCoordinator;
use crate::error::Error;
use crate::process::ProcessRegistry;
use crate::tools::ToolPaths;
use crate::types::{BatchId, BatchOutcome, BatchRequest, BatchState, BatchSummary, ProcessState};
use crate::utils;

use super::Orchestrator;

/// Everything the batch task owns
pub(crate) struct BatchContext {
    pub(crate) id: BatchId,
    pub(crate) request: BatchRequest,
    pub(crate) registry: Arc<ProcessRegistry>,
    pub(crate) cancel: CancellationToken,
    pub(crate) outcome_tx: watch::Sender<Option<BatchOutcome>>,
}

impl Orchestrator {
    /// Body of the background task spawned by `start_batch`
    pub(crate) async fn run_batch(self, context: BatchContext) {
        let outcome = self.execute_batch(&context).await;
        self.finish_batch(context, outcome);
    }

    async fn execute_batch(&self, context: &BatchContext) -> BatchOutcome {
        let id = context.id;
        let request = &context.request;
        let conversion = request.conversion();

        let tools = match ToolPaths::resolve(&self.config.tools, conversion.is_some()) {
            Ok(tools) => tools,
            Err(e) => return self.fail(id, e),
        };

        let mut dirs = vec![&request.output_dir];
        if let Some(target) = &conversion {
            dirs.push(&target.output_dir);
        }
        for dir in dirs {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::error!(
                    batch_id = %id,
                    dir = ?dir,
                    error = %e,
                    "failed to create directory"
                );
                return self.fail(id, Error::Io(e));
            }
        }

        self.log(id, "Starting download...");
        let downloader = DownloadCoordinator::new(
            tools.downloader,
            Arc::clone(&context.registry),
            self.event_tx.clone(),
            id,
        );
        let download = match downloader.run(&request.source_url, &request.output_dir).await {
            Ok(report) => report,
            Err(e) => return self.fail(id, e),
        };

        if context.cancel.is_cancelled() {
            return BatchOutcome::Cancelled;
        }
        match download.state {
            ProcessState::Killed => {
                self.log(id, "Download was killed.");
                return self.fail(
                    id,
                    Error::ChildExit {
                        process: "downloader".to_string(),
                        code: None,
                    },
                );
            }
            ProcessState::Exited { code: Some(code) } if code != 0 => {
                self.log(id, format!("Download finished with exit code {}.", code))
            }
            _ => self.log(id, "Download finished."),
        }

        let mut summary = BatchSummary {
            download_exit_code: download.state.exit_code(),
            downloaded_files: download.files,
            conversion: None,
        };

        let (Some(target), Some(transcoder)) = (conversion, tools.transcoder) else {
            return BatchOutcome::Completed(summary);
        };

        if !self.transition(id, BatchState::Converting) {
            return BatchOutcome::Cancelled;
        }

        let jobs = match utils::list_conversion_jobs(
            &request.output_dir,
            target.format,
            &target.output_dir,
        )
        .await
        {
            Ok(jobs) => jobs,
            Err(e) => return self.fail(id, e),
        };

        let cap = self.config.concurrency_cap();
        self.log(
            id,
            format!(
                "Starting conversion to {} ({} file(s), {} at a time)...",
                target.format,
                jobs.len(),
                cap.min(jobs.len()).max(1)
            ),
        );

        let drain_timeout = self.config.conversion.drain_timeout;
        let scheduler = ConversionScheduler::new(
            transcoder,
            Arc::clone(&context.registry),
            self.event_tx.clone(),
            id,
        )
        .with_cancellation(context.cancel.clone())
        .with_threads(Some(self.config.threads_per_job(cap)))
        .with_drain_timeout(drain_timeout)
        .with_termination_timeout(self.config.termination_timeout);

        let report = scheduler.run(jobs, cap).await;

        if context.cancel.is_cancelled() {
            return BatchOutcome::Cancelled;
        }
        if report.timed_out {
            return self.fail(
                id,
                Error::Timeout {
                    operation: "conversion drain".to_string(),
                    after: drain_timeout,
                },
            );
        }
        if let Some(reason) = report.launch_error {
            return BatchOutcome::Failed { reason };
        }

        self.log(
            id,
            format!(
                "All conversions done ({} succeeded, {} failed).",
                report.succeeded, report.failed
            ),
        );
        summary.conversion = Some(report.summary());
        BatchOutcome::Completed(summary)
    }

    fn fail(&self, id: BatchId, error: Error) -> BatchOutcome {
        tracing::error!(batch_id = %id, error = %error, code = error.code(), "batch step failed");
        self.log(id, format!("Error: {}", error));
        BatchOutcome::Failed {
            reason: error.to_string(),
        }
    }
}
