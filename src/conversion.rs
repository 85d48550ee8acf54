//! Bounded transcoder pool
//!
//! Conversion jobs are pulled from the job list in order by at most
//! `concurrency_cap` concurrent workers, one transcoder child per job. A
//! failed job never stops its siblings. The whole run is bounded by a drain
//! timeout after which every remaining child is killed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::process::{ChildProcess, ProcessRegistry};
use crate::tools;
use crate::types::{
    BatchId, ConversionJob, ConversionSummary, Event, LogLine, LogSource, ProcessState,
};

/// Default time allowed for killed children to be reaped after a drain timeout
const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one scheduler run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversionReport {
    /// Jobs handed to the scheduler
    pub total: usize,
    /// Jobs whose transcoder exited with status 0
    pub succeeded: usize,
    /// Jobs that exited non-zero, lost their output stream, or failed to launch
    pub failed: usize,
    /// Jobs killed, never started, or still running when the drain timed out
    pub cancelled: usize,
    /// Whether the drain timeout expired
    pub timed_out: bool,
    /// First launch error, if any; no further jobs were started after it
    pub launch_error: Option<String>,
}

impl ConversionReport {
    /// Tally exposed in the batch summary
    pub fn summary(&self) -> ConversionSummary {
        ConversionSummary {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
        }
    }
}

/// Counters shared by the workers of one run
#[derive(Default)]
struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    launch_error: OnceLock<String>,
}

/// Runs conversion jobs for one batch
pub struct ConversionScheduler {
    transcoder: PathBuf,
    registry: Arc<ProcessRegistry>,
    event_tx: broadcast::Sender<Event>,
    batch: BatchId,
    cancel: CancellationToken,
    threads: Option<usize>,
    drain_timeout: Duration,
    termination_timeout: Duration,
}

impl ConversionScheduler {
    /// Create a scheduler spawning `transcoder` into `registry`
    pub fn new(
        transcoder: impl Into<PathBuf>,
        registry: Arc<ProcessRegistry>,
        event_tx: broadcast::Sender<Event>,
        batch: BatchId,
    ) -> Self {
        Self {
            transcoder: transcoder.into(),
            registry,
            event_tx,
            batch,
            cancel: CancellationToken::new(),
            threads: None,
            drain_timeout: crate::config::ConversionConfig::default().drain_timeout,
            termination_timeout: DEFAULT_TERMINATION_TIMEOUT,
        }
    }

    /// Stop dequeuing jobs once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Pass `-threads <threads>` to every transcoder
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Bound the whole run
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// How long to wait for killed children after the drain timeout
    pub fn with_termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }

    /// Run every job with at most `concurrency_cap` transcoders at once
    ///
    /// Returns once every job is terminal. Jobs are started in list order.
    pub async fn run(&self, jobs: Vec<ConversionJob>, concurrency_cap: usize) -> ConversionReport {
        let total = jobs.len();
        if total == 0 {
            tracing::debug!(batch_id = %self.batch, "no conversion jobs");
            return ConversionReport::default();
        }

        let workers = concurrency_cap.clamp(1, total);
        tracing::info!(
            batch_id = %self.batch,
            jobs = total,
            workers,
            threads = ?self.threads,
            "starting conversion"
        );

        let tally = Tally::default();
        let drain =
            stream::iter(jobs).for_each_concurrent(workers, |job| self.run_job(job, &tally));
        let timed_out = tokio::time::timeout(self.drain_timeout, drain).await.is_err();

        if timed_out {
            tracing::warn!(
                batch_id = %self.batch,
                timeout = ?self.drain_timeout,
                "conversion drain timed out, killing remaining jobs"
            );
            self.log(
                LogSource::Orchestrator,
                format!(
                    "Conversion timed out after {:?}, stopping remaining jobs.",
                    self.drain_timeout
                ),
            );
            self.registry.terminate_all(true);
            if !self.registry.wait_until_empty(self.termination_timeout).await {
                tracing::error!(
                    batch_id = %self.batch,
                    live = self.registry.len(),
                    "transcoders still alive after drain timeout"
                );
            }
        }

        let succeeded = tally.succeeded.load(Ordering::SeqCst);
        let failed = tally.failed.load(Ordering::SeqCst);
        let report = ConversionReport {
            total,
            succeeded,
            failed,
            cancelled: total.saturating_sub(succeeded + failed),
            timed_out,
            launch_error: tally.launch_error.into_inner(),
        };
        tracing::info!(
            batch_id = %self.batch,
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            timed_out,
            "conversion finished"
        );
        report
    }

    /// Cancellation or shutdown; children killed afterwards are not failures
    fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled() || self.registry.is_shutting_down()
    }

    fn should_stop(&self, tally: &Tally) -> bool {
        self.stop_requested() || tally.launch_error.get().is_some()
    }

    async fn run_job(&self, job: ConversionJob, tally: &Tally) {
        if self.should_stop(tally) {
            tracing::debug!(
                batch_id = %self.batch,
                source = ?job.source_file,
                "skipping job, batch is stopping"
            );
            return;
        }

        let name = job.display_name();
        let source = LogSource::Conversion { file: name.clone() };
        let destination = job.destination_path();
        let command = tools::transcode_command(&self.transcoder, &job, self.threads);

        let mut child = match ChildProcess::spawn(command, name.clone(), &self.registry) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    batch_id = %self.batch,
                    file = %name,
                    error = %e,
                    "failed to start transcoder"
                );
                self.log(source, format!("Conversion error: {}", e));
                tally.failed.fetch_add(1, Ordering::SeqCst);
                tally.launch_error.set(e.to_string()).ok();
                return;
            }
        };

        self.emit(Event::JobStarted {
            batch: self.batch,
            source: job.source_file.clone(),
            destination: destination.clone(),
        });

        loop {
            match child.next_line().await {
                Ok(Some(line)) => self.log(source.clone(), line),
                Ok(None) => break,
                Err(e) => {
                    self.log(source.clone(), format!("Conversion error: {}", e));
                    break;
                }
            }
        }

        let state = child.wait().await;
        self.emit(Event::JobFinished {
            batch: self.batch,
            source: job.source_file.clone(),
            destination,
            state,
        });

        match state.check(&name) {
            Ok(()) => {
                tally.succeeded.fetch_add(1, Ordering::SeqCst);
                self.log(source, format!("Converted {}", name));
            }
            Err(_) if state == ProcessState::Killed && self.stop_requested() => {
                tracing::debug!(batch_id = %self.batch, file = %name, "transcoder killed");
            }
            Err(_) if state == ProcessState::Killed => {
                tally.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    batch_id = %self.batch,
                    file = %name,
                    "transcoder killed unexpectedly"
                );
                self.log(source, format!("Conversion error: {} was killed", name));
            }
            Err(e) => {
                tally.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    batch_id = %self.batch,
                    file = %name,
                    error = %e,
                    "conversion failed"
                );
                self.log(source, format!("Conversion error: {}", e));
            }
        }
    }

    fn log(&self, source: LogSource, text: impl Into<String>) {
        self.emit(Event::Log {
            batch: self.batch,
            line: LogLine::new(source, text),
        });
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}
