//! Registry of live child processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::ProcessHandle;
use crate::types::ProcessId;

/// Interval between checks while waiting for the registry to drain
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Thread-safe set of the child processes currently alive in one batch
///
/// Every spawner of a batch receives the same registry. Membership changes and
/// the shutting-down flag share one lock, so a process registered after
/// [`terminate_all`](Self::terminate_all) started is terminated on the spot
/// instead of slipping through.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<ProcessId, Arc<ProcessHandle>>,
    /// Set by `terminate_all`; `Some(forced)` once shutdown began
    shutdown: Option<bool>,
}

impl ProcessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a live process
    ///
    /// If shutdown already began, the process is terminated immediately with
    /// the same force as the shutdown request. It is still recorded so callers
    /// waiting for the registry to drain also wait for it.
    pub fn register(&self, handle: Arc<ProcessHandle>) {
        let mut state = self.state();
        if handle.state().is_terminal() {
            return;
        }
        if let Some(forced) = state.shutdown {
            tracing::debug!(
                process = %handle.label(),
                id = %handle.id(),
                "registered during shutdown, terminating immediately"
            );
            handle.terminate(forced);
        }
        state.live.insert(handle.id(), handle);
    }

    /// Remove a process; unknown IDs are ignored
    pub fn unregister(&self, id: ProcessId) {
        self.state().live.remove(&id);
    }

    /// Terminate every live process and every process registered afterwards
    ///
    /// Returns the number of processes signalled. Calling it again with
    /// `forced = true` escalates an earlier cooperative request.
    pub fn terminate_all(&self, forced: bool) -> usize {
        let snapshot: Vec<Arc<ProcessHandle>> = {
            let mut state = self.state();
            let escalated = state.shutdown.unwrap_or(false) || forced;
            state.shutdown = Some(escalated);
            state.live.values().cloned().collect()
        };

        tracing::info!(count = snapshot.len(), forced, "terminating all child processes");
        for handle in &snapshot {
            handle.terminate(forced);
        }
        snapshot.len()
    }

    /// Whether [`terminate_all`](Self::terminate_all) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutdown.is_some()
    }

    /// Number of live processes
    pub fn len(&self) -> usize {
        self.state().live.len()
    }

    /// Whether no process is live
    pub fn is_empty(&self) -> bool {
        self.state().live.is_empty()
    }

    /// Wait until every process has been unregistered
    ///
    /// Returns `false` if processes were still live after `timeout`.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let live = self.len();
                if live == 0 {
                    return;
                }
                tracing::trace!(live, "waiting for child processes to exit");
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
