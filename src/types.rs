//! Core types for vd-master

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ValidationError;
use crate::utils;

/// Unique identifier for a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a spawned child process
///
/// Assigned by the crate, never reused within one host process. Not an OS pid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audio format produced by the transcoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// AAC audio in an MPEG-4 container (.m4a)
    M4a,
    /// MPEG-1 Layer III (.mp3)
    Mp3,
    /// Uncompressed PCM (.wav)
    Wav,
}

impl TargetFormat {
    /// File extension (without the leading dot)
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::M4a => "m4a",
            TargetFormat::Mp3 => "mp3",
            TargetFormat::Wav => "wav",
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let ext = trimmed.strip_prefix('.').unwrap_or(trimmed);
        match ext.to_ascii_lowercase().as_str() {
            "m4a" => Ok(TargetFormat::M4a),
            "mp3" => Ok(TargetFormat::Mp3),
            "wav" => Ok(TargetFormat::Wav),
            _ => Err(format!("unsupported target format: {s}")),
        }
    }
}

/// Everything the presentation layer supplies to start a batch
///
/// The shape mirrors the input form: a conversion flag plus optional format and
/// destination. [`BatchRequest::validate`] enforces that both are present when
/// `convert` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// URL handed to the downloader
    pub source_url: String,

    /// Directory the downloader writes into
    pub output_dir: PathBuf,

    /// Whether downloaded files are transcoded afterwards
    #[serde(default)]
    pub convert: bool,

    /// Target format (required when `convert` is set)
    #[serde(default)]
    pub target_format: Option<TargetFormat>,

    /// Destination for converted files (required when `convert` is set)
    #[serde(default)]
    pub conversion_output_dir: Option<PathBuf>,
}

/// Conversion settings of a validated request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionTarget {
    /// Target format
    pub format: TargetFormat,
    /// Destination directory
    pub output_dir: PathBuf,
}

impl BatchRequest {
    /// Create a download-only request
    pub fn new(source_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            output_dir: output_dir.into(),
            convert: false,
            target_format: None,
            conversion_output_dir: None,
        }
    }

    /// Request conversion of every downloaded container file
    pub fn with_conversion(mut self, format: TargetFormat, output_dir: impl Into<PathBuf>) -> Self {
        self.convert = true;
        self.target_format = Some(format);
        self.conversion_output_dir = Some(output_dir.into());
        self
    }

    /// Check the request before anything is spawned
    ///
    /// Rejects an empty URL or output directory, and a conversion request that
    /// lacks a format or destination. Paths that exist but are not directories
    /// are rejected too; paths that do not exist yet are fine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ValidationError::MissingOutputDir);
        }
        ensure_directory_or_absent(&self.output_dir)?;

        if self.convert {
            if self.target_format.is_none() {
                return Err(ValidationError::MissingTargetFormat);
            }
            match &self.conversion_output_dir {
                Some(dir) if !dir.as_os_str().is_empty() => ensure_directory_or_absent(dir)?,
                _ => return Err(ValidationError::MissingConversionDir),
            }
        }

        Ok(())
    }

    /// Conversion settings, if conversion was requested and fully specified
    pub fn conversion(&self) -> Option<ConversionTarget> {
        if !self.convert {
            return None;
        }
        match (self.target_format, &self.conversion_output_dir) {
            (Some(format), Some(output_dir)) => Some(ConversionTarget {
                format,
                output_dir: output_dir.clone(),
            }),
            _ => None,
        }
    }
}

fn ensure_directory_or_absent(path: &Path) -> Result<(), ValidationError> {
    if path.exists() && !path.is_dir() {
        return Err(ValidationError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// A single file's conversion task within a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Downloaded container file
    pub source_file: PathBuf,
    /// Format to produce
    pub target_format: TargetFormat,
    /// Directory the converted file is written into
    pub destination_dir: PathBuf,
}

impl ConversionJob {
    /// Create a job for one source file
    pub fn new(
        source_file: impl Into<PathBuf>,
        target_format: TargetFormat,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            target_format,
            destination_dir: destination_dir.into(),
        }
    }

    /// Source file name, used to prefix the job's log lines
    pub fn display_name(&self) -> String {
        self.source_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_file.to_string_lossy().into_owned())
    }

    /// `<sourceBaseName>.<format extension>`, stripping only the last extension
    pub fn destination_file_name(&self) -> String {
        format!(
            "{}.{}",
            utils::strip_last_extension(&self.display_name()),
            self.target_format.extension()
        )
    }

    /// Full path of the converted file
    pub fn destination_path(&self) -> PathBuf {
        self.destination_dir.join(self.destination_file_name())
    }
}

/// Lifecycle state of a child process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    /// Spawned, supervisor not yet running
    Starting,
    /// Supervised and running
    Running,
    /// Exited on its own (`code` is `None` when no status is known)
    Exited {
        /// Exit code
        code: Option<i32>,
    },
    /// Terminated at our request or by a signal
    Killed,
}

impl ProcessState {
    /// Whether the process has reached `Exited` or `Killed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited { .. } | ProcessState::Killed)
    }

    /// Whether the process exited with status 0
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessState::Exited { code: Some(0) })
    }

    /// Exit code, if the process exited on its own and reported one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessState::Exited { code } => *code,
            _ => None,
        }
    }

    /// Turn an unsuccessful exit into [`Error::ChildExit`](crate::Error::ChildExit)
    pub fn check(&self, process: &str) -> crate::Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(crate::Error::ChildExit {
                process: process.to_string(),
                code: self.exit_code(),
            })
        }
    }
}

/// Orchestrator state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// No batch running
    Idle,
    /// The downloader is running
    Downloading,
    /// Transcoder jobs are running
    Converting,
    /// Batch completed (possibly with per-job failures)
    Done,
    /// Batch cancelled by the caller or by shutdown
    Cancelled,
    /// Batch failed (launch error, timeout, I/O)
    Failed,
}

impl BatchState {
    /// States from which `cancel_batch` is accepted
    pub fn is_cancellable(&self) -> bool {
        matches!(self, BatchState::Downloading | BatchState::Converting)
    }

    /// Terminal states announced before returning to `Idle`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Done | BatchState::Cancelled | BatchState::Failed
        )
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchState::Idle => "idle",
            BatchState::Downloading => "downloading",
            BatchState::Converting => "converting",
            BatchState::Done => "done",
            BatchState::Cancelled => "cancelled",
            BatchState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-batch conversion tally
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSummary {
    /// Jobs derived from the download directory
    pub total: usize,
    /// Jobs whose transcoder exited with status 0
    pub succeeded: usize,
    /// Jobs that exited non-zero or could not be read
    pub failed: usize,
    /// Jobs killed or never started because the batch stopped
    pub cancelled: usize,
}

/// Result of a batch that ran to completion
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Exit code of the downloader (`None` if unknown)
    pub download_exit_code: Option<i32>,
    /// Files present in the output directory after the download
    pub downloaded_files: Vec<PathBuf>,
    /// Conversion tally (`None` when conversion was not requested)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionSummary>,
}

/// Terminal result of one batch, delivered exactly once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Download finished and every conversion job reached a terminal state
    Completed(BatchSummary),
    /// Cancelled by the caller or by shutdown
    Cancelled,
    /// A launch error, drain timeout, or I/O failure ended the batch
    Failed {
        /// Human-readable reason
        reason: String,
    },
}

impl BatchOutcome {
    /// The terminal [`BatchState`] matching this outcome
    pub fn state(&self) -> BatchState {
        match self {
            BatchOutcome::Completed(_) => BatchState::Done,
            BatchOutcome::Cancelled => BatchState::Cancelled,
            BatchOutcome::Failed { .. } => BatchState::Failed,
        }
    }
}

/// Where a log line came from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogSource {
    /// Status messages from the orchestrator itself
    Orchestrator,
    /// Output of the downloader
    Download,
    /// Output of one transcoder job
    Conversion {
        /// Source file name of the job
        file: String,
    },
}

/// One line of log output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Origin of the line
    pub source: LogSource,
    /// Line text without the trailing line terminator
    pub text: String,
    /// When the line was received
    pub at: DateTime<Utc>,
}

impl LogLine {
    /// Create a line stamped with the current time
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            LogSource::Conversion { file } => write!(f, "[{}] {}", file, self.text),
            LogSource::Orchestrator | LogSource::Download => f.write_str(&self.text),
        }
    }
}

/// Event emitted during a batch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Orchestrator moved to a new state
    StateChanged {
        /// Batch ID
        batch: BatchId,
        /// New state
        state: BatchState,
    },

    /// A line of output from a child process or the orchestrator
    Log {
        /// Batch ID
        batch: BatchId,
        /// The line
        line: LogLine,
    },

    /// The downloader was spawned
    DownloadStarted {
        /// Batch ID
        batch: BatchId,
        /// Source URL
        url: String,
        /// OS process id, if available
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },

    /// The downloader reached a terminal state
    DownloadFinished {
        /// Batch ID
        batch: BatchId,
        /// Final process state
        state: ProcessState,
        /// Number of files present in the output directory
        files: usize,
    },

    /// A transcoder job was spawned
    JobStarted {
        /// Batch ID
        batch: BatchId,
        /// Source file
        source: PathBuf,
        /// Destination file
        destination: PathBuf,
    },

    /// A transcoder job reached a terminal state
    JobFinished {
        /// Batch ID
        batch: BatchId,
        /// Source file
        source: PathBuf,
        /// Destination file
        destination: PathBuf,
        /// Final process state
        state: ProcessState,
    },

    /// The batch is over; emitted exactly once per batch
    BatchFinished {
        /// Batch ID
        batch: BatchId,
        /// Terminal outcome
        outcome: BatchOutcome,
    },

    /// Orchestrator shutdown completed
    Shutdown,
}
