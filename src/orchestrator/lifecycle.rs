//! Shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::Event;

use super::Orchestrator;

impl Orchestrator {
    /// Shut down, killing every child process of the active batch
    ///
    /// This method performs the shutdown sequence:
    /// 1. Stops accepting new batches
    /// 2. Cancels the active batch, if any, and force-terminates its children
    /// 3. Waits for the children to be reaped and the batch to deliver its
    ///    outcome, bounded by `termination_timeout` each
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// After this returns no child process started by this orchestrator is
    /// alive unless the timeout expired, which is logged.
    ///
    /// # Errors
    ///
    /// Currently always succeeds; the `Result` leaves room for teardown steps
    /// that can fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new batches
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new batches");

        // 2. Cancel the active batch
        let active = {
            let control = self.control();
            control
                .active
                .as_ref()
                .map(|active| (active.id, active.registry.clone(), active.outcome.clone()))
        };

        if let Some((id, registry, mut outcome)) = active {
            // A batch that is already finishing is not cancellable; its
            // children are still killed below.
            if let Err(e) = self.cancel_active(id) {
                tracing::debug!(batch_id = %id, error = %e, "active batch not cancellable");
            }
            let terminated = registry.terminate_all(true);
            self.log(id, format!("Shutting down, stopping {} running process(es)...", terminated));

            // 3. Wait for children and the batch task
            let timeout = self.config.termination_timeout;
            if registry.wait_until_empty(timeout).await {
                tracing::info!(batch_id = %id, "All child processes exited");
            } else {
                tracing::warn!(
                    batch_id = %id,
                    live = registry.len(),
                    "Timeout waiting for child processes to exit, proceeding with shutdown"
                );
            }

            let finished = tokio::time::timeout(timeout, outcome.wait_for(Option::is_some))
                .await
                .map(|result| result.is_ok())
                .unwrap_or(false);
            if !finished {
                tracing::warn!(batch_id = %id, "Timeout waiting for batch to finish");
            }
        }

        // 4. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
