//! Error types for vd-master
//!
//! This module provides error handling for the library, including:
//! - A crate-wide [`Error`] covering launch, stream, timeout, and state failures
//! - [`ValidationError`] for batch requests rejected before anything is spawned
//! - Machine-readable error codes for presentation layers

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::BatchState;

/// Result type alias for vd-master operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vd-master
///
/// Each variant includes enough context to produce a useful log line; the
/// orchestrator forwards the `Display` text of every batch-level failure to
/// subscribers as part of the log stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_jobs")
        key: Option<String>,
    },

    /// The batch request failed validation
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// An external tool could not be started (missing executable, OS refusal)
    #[error("failed to start {tool}: {reason}")]
    Launch {
        /// The tool that failed to launch (e.g., "yt-dlp")
        tool: String,
        /// Why the launch failed
        reason: String,
    },

    /// A child process exited unsuccessfully
    #[error("{process} exited with {}", describe_code(.code))]
    ChildExit {
        /// Label of the process that failed
        process: String,
        /// Exit code, if the process reported one
        code: Option<i32>,
    },

    /// Reading the merged output of a child process failed
    #[error("failed to read output of {process}: {source}")]
    StreamRead {
        /// Label of the process whose output could not be read
        process: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An operation did not finish within its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out (e.g., "conversion drain")
        operation: String,
        /// How long the operation was allowed to run
        after: Duration,
    },

    /// A batch is already in progress
    #[error("a batch is already running")]
    AlreadyRunning,

    /// No batch in a cancellable state matches the request
    #[error("no running batch to cancel (current state: {state})")]
    NotRunning {
        /// The orchestrator state at the time of the request
        state: BatchState,
    },

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a [`BatchRequest`](crate::types::BatchRequest) is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The source URL is empty
    #[error("source URL must be specified")]
    MissingUrl,

    /// The download directory is empty
    #[error("output directory must be specified")]
    MissingOutputDir,

    /// Conversion was requested without a target format
    #[error("a target format must be selected when conversion is requested")]
    MissingTargetFormat,

    /// Conversion was requested without a destination directory
    #[error("a conversion output directory must be specified when conversion is requested")]
    MissingConversionDir,

    /// A directory path points at something that is not a directory
    #[error("{path} exists and is not a directory")]
    NotADirectory {
        /// The offending path
        path: PathBuf,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "unknown status".to_string(),
    }
}

impl Error {
    /// Convenience constructor for [`Error::Launch`]
    pub fn launch(tool: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Launch {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Config`]
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code
    ///
    /// Presentation layers can use this for programmatic handling without
    /// matching on `Display` text.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(e) => match e {
                ValidationError::MissingUrl => "missing_url",
                ValidationError::MissingOutputDir => "missing_output_dir",
                ValidationError::MissingTargetFormat => "missing_target_format",
                ValidationError::MissingConversionDir => "missing_conversion_dir",
                ValidationError::NotADirectory { .. } => "not_a_directory",
            },
            Error::Launch { .. } => "launch_error",
            Error::ChildExit { .. } => "child_exit_error",
            Error::StreamRead { .. } => "stream_read_error",
            Error::Timeout { .. } => "timeout",
            Error::AlreadyRunning => "already_running",
            Error::NotRunning { .. } => "not_running",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
        }
    }
}
