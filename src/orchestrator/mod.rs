//! Orchestration facade split into focused submodules.
//!
//! The `Orchestrator` struct and its methods are organized by concern:
//! - [`control`] - Starting and cancelling batches, state transitions
//! - [`batch`] - The download then convert flow of one batch
//! - [`lifecycle`] - Process-wide shutdown

mod batch;
mod control;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests;

pub use control::BatchHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::process::ProcessRegistry;
use crate::types::{BatchId, BatchOutcome, BatchState, Event, LogLine, LogSource};

/// The batch currently owned by the orchestrator
pub(crate) struct ActiveBatch {
    pub(crate) id: BatchId,
    /// Every child of this batch is registered here
    pub(crate) registry: Arc<ProcessRegistry>,
    /// Stops the conversion pool from dequeuing more jobs
    pub(crate) cancel: CancellationToken,
    /// Resolves once the batch task delivered its outcome
    pub(crate) outcome: watch::Receiver<Option<BatchOutcome>>,
}

/// State guarded by the control lock
pub(crate) struct ControlState {
    pub(crate) state: BatchState,
    pub(crate) active: Option<ActiveBatch>,
    pub(crate) next_batch_id: u64,
}

/// Drives one batch at a time: download, then optional conversion
///
/// Cheap to clone; all fields are shared. Subscribe with
/// [`subscribe`](Self::subscribe) to receive log lines, state changes and
/// batch outcomes.
#[derive(Clone)]
pub struct Orchestrator {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// State machine and the active batch
    pub(crate) control: Arc<Mutex<ControlState>>,
    /// Cleared by shutdown; new batches are rejected afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Create an idle orchestrator
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` fails validation.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(config.event_channel_capacity);

        tracing::debug!(
            cap = config.concurrency_cap(),
            drain_timeout = ?config.conversion.drain_timeout,
            "orchestrator created"
        );

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            control: Arc::new(Mutex::new(ControlState {
                state: BatchState::Idle,
                active: None,
                next_batch_id: 1,
            })),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to orchestrator events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently. A subscriber that falls behind by more than
    /// `event_channel_capacity` events receives `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vd_master::{Config, Event, Orchestrator};
    ///
    /// # fn example() -> vd_master::Result<()> {
    /// let orchestrator = Orchestrator::new(Config::default())?;
    /// let mut events = orchestrator.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         if let Event::Log { line, .. } = event {
    ///             println!("{}", line);
    ///         }
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Current state of the state machine
    pub fn state(&self) -> BatchState {
        self.control().state
    }

    /// Number of child processes alive in the active batch
    pub fn live_processes(&self) -> usize {
        self.control()
            .active
            .as_ref()
            .map(|active| active.registry.len())
            .unwrap_or(0)
    }

    /// Whether new batches are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    pub(crate) fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Emit a status line from the orchestrator itself
    pub(crate) fn log(&self, batch: BatchId, text: impl Into<String>) {
        self.emit_event(Event::Log {
            batch,
            line: LogLine::new(LogSource::Orchestrator, text),
        });
    }
}
