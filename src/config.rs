//! Configuration types for vd-master
//!
//! Configuration lives in memory only; nothing is read from disk. The structs
//! derive serde so hosts can embed them in their own settings files.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// External tool locations
///
/// Groups settings for the downloader and transcoder binaries.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the downloader executable (auto-detected if None)
    #[serde(default)]
    pub downloader_path: Option<PathBuf>,

    /// Path to the transcoder executable (auto-detected if None)
    #[serde(default)]
    pub transcoder_path: Option<PathBuf>,

    /// Downloader name searched for in PATH (default: "yt-dlp")
    #[serde(default = "default_downloader_name")]
    pub downloader_name: String,

    /// Transcoder name searched for in PATH (default: "ffmpeg")
    #[serde(default = "default_transcoder_name")]
    pub transcoder_name: String,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            downloader_path: None,
            transcoder_path: None,
            downloader_name: default_downloader_name(),
            transcoder_name: default_transcoder_name(),
            search_path: true,
        }
    }
}

/// Conversion pool settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Maximum transcoder processes running at once (default: available processing units)
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,

    /// Value passed to the transcoder's `-threads` option
    ///
    /// When unset, the available processing units are divided evenly across
    /// the concurrent jobs so the pool never asks for more threads than there
    /// are cores.
    #[serde(default)]
    pub transcoder_threads: Option<usize>,

    /// How long a conversion batch may take to drain (default: 1 hour)
    #[serde(default = "default_drain_timeout", with = "duration_serde")]
    pub drain_timeout: Duration,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: None,
            transcoder_threads: None,
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// Main configuration for [`Orchestrator`](crate::Orchestrator)
///
/// Sub-configs are flattened, so the serialized form has no nesting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// External tool locations
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Conversion pool settings
    #[serde(flatten)]
    pub conversion: ConversionConfig,

    /// How long cancel/shutdown waits for killed processes to be reaped (default: 10 seconds)
    #[serde(default = "default_termination_timeout", with = "duration_serde")]
    pub termination_timeout: Duration,

    /// Capacity of the event broadcast channel (default: 4096)
    ///
    /// Subscribers that fall further behind than this receive
    /// `RecvError::Lagged` with the number of skipped events.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            conversion: ConversionConfig::default(),
            termination_timeout: default_termination_timeout(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Reject settings that can never work
    pub fn validate(&self) -> Result<()> {
        if self.conversion.max_concurrent_jobs == Some(0) {
            return Err(Error::config(
                "must be at least 1 when set",
                "max_concurrent_jobs",
            ));
        }
        if self.conversion.transcoder_threads == Some(0) {
            return Err(Error::config(
                "must be at least 1 when set",
                "transcoder_threads",
            ));
        }
        if self.conversion.drain_timeout.is_zero() {
            return Err(Error::config("must be non-zero", "drain_timeout"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("must be at least 1", "event_channel_capacity"));
        }
        if !self.tools.search_path
            && (self.tools.downloader_path.is_none() || self.tools.transcoder_path.is_none())
        {
            tracing::warn!(
                "PATH search disabled and a tool path is unset; batches needing it will fail"
            );
        }
        Ok(())
    }

    /// Worker pool size for conversion
    pub fn concurrency_cap(&self) -> usize {
        self.conversion
            .max_concurrent_jobs
            .unwrap_or_else(crate::utils::available_parallelism)
            .max(1)
    }

    /// `-threads` value for each transcoder job given the pool size
    pub fn threads_per_job(&self, concurrency_cap: usize) -> usize {
        match self.conversion.transcoder_threads {
            Some(threads) => threads.max(1),
            None => (crate::utils::available_parallelism() / concurrency_cap.max(1)).max(1),
        }
    }
}

fn default_downloader_name() -> String {
    "yt-dlp".to_string()
}

fn default_transcoder_name() -> String {
    "ffmpeg".to_string()
}

fn default_true() -> bool {
    true
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(60 * 60) // 1 hour
}

fn default_termination_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_event_channel_capacity() -> usize {
    4096
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.tools.downloader_name, "yt-dlp");
        assert_eq!(config.tools.transcoder_name, "ffmpeg");
        assert!(config.tools.search_path);
        assert_eq!(config.conversion.drain_timeout, Duration::from_secs(3600));
        assert_eq!(config.termination_timeout, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn concurrency_cap_defaults_to_available_parallelism() {
        let config = Config::default();
        assert_eq!(
            config.concurrency_cap(),
            crate::utils::available_parallelism()
        );

        let mut config = Config::default();
        config.conversion.max_concurrent_jobs = Some(3);
        assert_eq!(config.concurrency_cap(), 3);
    }

    #[test]
    fn threads_per_job_never_oversubscribes() {
        let config = Config::default();
        let cores = crate::utils::available_parallelism();
        for cap in 1..=cores {
            let threads = config.threads_per_job(cap);
            assert!(threads >= 1);
            assert!(threads * cap <= cores.max(cap));
        }
    }

    #[test]
    fn explicit_threads_win() {
        let mut config = Config::default();
        config.conversion.transcoder_threads = Some(2);
        assert_eq!(config.threads_per_job(8), 2);
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = Config::default();
        config.conversion.max_concurrent_jobs = Some(0);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: Some(ref k), .. } if k == "max_concurrent_jobs"
        ));

        let mut config = Config::default();
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.conversion.drain_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serializes_flat_with_seconds() {
        let mut config = Config::default();
        config.tools.transcoder_path = Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        config.conversion.max_concurrent_jobs = Some(4);

        let json = serde_json::to_value(&config).expect("serialize failed");
        assert_eq!(json["drain_timeout"], 3600);
        assert_eq!(json["max_concurrent_jobs"], 4);
        assert_eq!(json["transcoder_path"], "/opt/ffmpeg/bin/ffmpeg");

        let parsed: Config = serde_json::from_value(json).expect("deserialize failed");
        assert_eq!(parsed.conversion.max_concurrent_jobs, Some(4));
        assert_eq!(parsed.conversion.drain_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn empty_json_uses_defaults() {
        let parsed: Config = serde_json::from_str("{}").expect("deserialize failed");
        assert_eq!(parsed.tools.downloader_name, "yt-dlp");
        assert_eq!(parsed.termination_timeout, Duration::from_secs(10));
    }
}
