//! Batch control: start, cancel, state transitions.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::process::ProcessRegistry;
use crate::types::{BatchId, BatchOutcome, BatchRequest, BatchState, Event};

use super::batch::BatchContext;
use super::{ActiveBatch, Orchestrator};

/// Ticket for a started batch
///
/// Identifies the batch for [`Orchestrator::cancel_batch`] and yields its
/// single [`BatchOutcome`].
#[derive(Clone, Debug)]
pub struct BatchHandle {
    id: BatchId,
    outcome: watch::Receiver<Option<BatchOutcome>>,
}

impl BatchHandle {
    /// ID carried by this batch's events
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Outcome, if the batch already finished
    pub fn try_outcome(&self) -> Option<BatchOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the batch to finish
    ///
    /// By the time this returns the orchestrator is back in
    /// [`BatchState::Idle`] and accepts the next batch.
    pub async fn outcome(&self) -> BatchOutcome {
        let mut outcome = self.outcome.clone();
        match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(BatchOutcome::Cancelled),
            // The batch task went away without reporting
            Err(_) => BatchOutcome::Failed {
                reason: "batch task ended without an outcome".to_string(),
            },
        }
    }
}

impl Orchestrator {
    /// Start a batch
    ///
    /// Validates `request`, moves to [`BatchState::Downloading`] and runs the
    /// batch in a background task. Progress arrives through
    /// [`subscribe`](Self::subscribe); the outcome through the returned handle.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) began
    /// - [`Error::Validation`] if the request is incomplete
    /// - [`Error::AlreadyRunning`] unless the orchestrator is idle
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use vd_master::*;
    /// # async fn example(orchestrator: Orchestrator) -> Result<()> {
    /// let request = BatchRequest::new("https://example.com/watch?v=abc", "/data/videos")
    ///     .with_conversion(TargetFormat::Mp3, "/data/music");
    /// let batch = orchestrator.start_batch(request).await?;
    /// match batch.outcome().await {
    ///     BatchOutcome::Completed(summary) => println!("{:?}", summary.conversion),
    ///     other => println!("batch ended: {:?}", other),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_batch(&self, request: BatchRequest) -> Result<BatchHandle> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        request.validate()?;

        let (handle, context) = {
            let mut control = self.control();
            // Checked again under the lock so a concurrent shutdown cannot miss this batch
            if !self.accepting_new.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            if control.state != BatchState::Idle {
                return Err(Error::AlreadyRunning);
            }

            let id = BatchId(control.next_batch_id);
            control.next_batch_id += 1;

            let registry = Arc::new(ProcessRegistry::new());
            let cancel = CancellationToken::new();
            let (outcome_tx, outcome_rx) = watch::channel(None);

            control.state = BatchState::Downloading;
            control.active = Some(ActiveBatch {
                id,
                registry: Arc::clone(&registry),
                cancel: cancel.clone(),
                outcome: outcome_rx.clone(),
            });

            (
                BatchHandle {
                    id,
                    outcome: outcome_rx,
                },
                BatchContext {
                    id,
                    request,
                    registry,
                    cancel,
                    outcome_tx,
                },
            )
        };

        tracing::info!(
            batch_id = %handle.id,
            url = %context.request.source_url,
            convert = context.request.convert,
            "batch started"
        );
        self.emit_event(Event::StateChanged {
            batch: handle.id,
            state: BatchState::Downloading,
        });

        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_batch(context).await });

        Ok(handle)
    }

    /// Cancel a running batch
    ///
    /// Moves straight to [`BatchState::Cancelled`] and kills every child
    /// process of the batch. The handle's outcome becomes
    /// [`BatchOutcome::Cancelled`] once the batch task has wound down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] unless `batch` is the active batch and it
    /// is downloading or converting.
    pub async fn cancel_batch(&self, batch: &BatchHandle) -> Result<()> {
        let registry = self.cancel_active(batch.id)?;
        let terminated = registry.terminate_all(true);
        tracing::info!(batch_id = %batch.id, terminated, "batch cancelled");
        self.log(batch.id, format!("Stopping {} running process(es)...", terminated));
        Ok(())
    }

    /// Mark the active batch cancelled and stop its job queue
    ///
    /// Returns the batch registry so the caller can terminate its children
    /// after the control lock is released.
    pub(crate) fn cancel_active(&self, id: BatchId) -> Result<Arc<ProcessRegistry>> {
        let registry = {
            let mut control = self.control();
            let state = control.state;
            let registry = match &control.active {
                Some(active) if active.id == id && state.is_cancellable() => {
                    active.cancel.cancel();
                    Arc::clone(&active.registry)
                }
                _ => return Err(Error::NotRunning { state }),
            };
            control.state = BatchState::Cancelled;
            registry
        };

        self.emit_event(Event::StateChanged {
            batch: id,
            state: BatchState::Cancelled,
        });
        Ok(registry)
    }

    /// Move the active batch to `next`
    ///
    /// Returns `false` without changing anything if the batch was cancelled
    /// in the meantime.
    pub(crate) fn transition(&self, id: BatchId, next: BatchState) -> bool {
        {
            let mut control = self.control();
            let is_active = control.active.as_ref().is_some_and(|active| active.id == id);
            if !is_active || control.state == BatchState::Cancelled {
                return false;
            }
            control.state = next;
        }
        tracing::debug!(batch_id = %id, state = %next, "batch state changed");
        self.emit_event(Event::StateChanged {
            batch: id,
            state: next,
        });
        true
    }

    /// Deliver the outcome of the active batch and return to idle
    ///
    /// A batch cancelled while it was finishing reports
    /// [`BatchOutcome::Cancelled`] whatever it computed.
    pub(crate) fn finish_batch(&self, context: BatchContext, outcome: BatchOutcome) {
        let (outcome, announce) = {
            let mut control = self.control();
            let outcome = if control.state == BatchState::Cancelled {
                BatchOutcome::Cancelled
            } else {
                outcome
            };
            let terminal = outcome.state();
            let announce = control.state != terminal;
            control.state = terminal;
            (outcome, announce)
        };

        let id = context.id;
        let terminal = outcome.state();
        if announce {
            self.emit_event(Event::StateChanged {
                batch: id,
                state: terminal,
            });
        }

        match &outcome {
            BatchOutcome::Completed(summary) => {
                tracing::info!(
                    batch_id = %id,
                    files = summary.downloaded_files.len(),
                    conversion = ?summary.conversion,
                    "batch completed"
                );
                self.log(id, "Batch finished.");
            }
            BatchOutcome::Cancelled => {
                tracing::info!(batch_id = %id, "batch stopped");
                self.log(id, "Process stopped.");
            }
            BatchOutcome::Failed { reason } => {
                tracing::error!(batch_id = %id, reason = %reason, "batch failed");
                self.log(id, format!("Batch failed: {}", reason));
            }
        }
        self.emit_event(Event::BatchFinished {
            batch: id,
            outcome: outcome.clone(),
        });

        {
            let mut control = self.control();
            control.state = BatchState::Idle;
            control.active = None;
        }
        self.emit_event(Event::StateChanged {
            batch: id,
            state: BatchState::Idle,
        });

        context.outcome_tx.send_replace(Some(outcome));
    }
}
