//! # vd-master
//!
//! Process orchestration for a media downloader and a media transcoder.
//!
//! vd-master drives two external command-line tools as child processes: a
//! downloader (`yt-dlp`) that fetches media from a URL into a directory, and a
//! transcoder (`ffmpeg`) that converts each downloaded container file into an
//! audio format. It streams their output line by line, runs conversions in a
//! bounded pool, and guarantees that cancellation and shutdown leave no child
//! process behind.
//!
//! ## Design Philosophy
//!
//! vd-master is designed to be:
//! - **Library-first** - No UI; any presentation layer drives it through a small facade
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Leak-free** - Every child is registered so it can be killed on cancel or shutdown
//!
//! ## Quick Start
//!
//! ```no_run
//! use vd_master::{BatchRequest, Config, Event, Orchestrator, TargetFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(Config::default())?;
//!
//!     // Print every log line
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Event::Log { line, .. } = event {
//!                 println!("{}", line);
//!             }
//!         }
//!     });
//!
//!     let request = BatchRequest::new("https://example.com/watch?v=abc", "/data/videos")
//!         .with_conversion(TargetFormat::Mp3, "/data/music");
//!     let batch = orchestrator.start_batch(request).await?;
//!     println!("{:?}", batch.outcome().await);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Bounded transcoder pool
pub mod conversion;
/// Downloader step
pub mod download;
/// Error types
pub mod error;
/// Orchestration facade (start, cancel, subscribe, shutdown)
pub mod orchestrator;
/// Child process supervision and the process registry
pub mod process;
/// External tool discovery and command lines
pub mod tools;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, ConversionConfig, ToolsConfig};
pub use conversion::{ConversionReport, ConversionScheduler};
pub use download::{DownloadCoordinator, DownloadReport};
pub use error::{Error, Result, ValidationError};
pub use orchestrator::{BatchHandle, Orchestrator};
pub use process::{ChildProcess, CommandLine, ProcessHandle, ProcessRegistry};
pub use types::{
    BatchId, BatchOutcome, BatchRequest, BatchState, BatchSummary, ConversionJob,
    ConversionSummary, Event, LogLine, LogSource, ProcessId, ProcessState, TargetFormat,
};

/// Helper function to run the orchestrator with graceful signal handling.
///
/// Waits for a termination signal and then calls the orchestrator's
/// `shutdown()` method. It returns only after every child process of the
/// active batch has been killed and reaped, so the host may exit right after.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use vd_master::{Config, Orchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(Config::default())?;
///
///     // Hand a clone to the presentation layer, then block until a signal arrives
///     let _ui = orchestrator.clone();
///     run_with_shutdown(orchestrator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
