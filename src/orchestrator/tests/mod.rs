use super::*;
use crate::config::Config;
use crate::error::Error;
use crate::test_helpers::{
    crashing_transcoder, drain_events, fake_downloader, fake_transcoder, slow_tool, wait_until,
};
use crate::types::{BatchRequest, ConversionSummary, ProcessState, TargetFormat};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

mod control;
mod lifecycle;

/// Orchestrator using the given tool paths with PATH search disabled
fn create_test_orchestrator(downloader: PathBuf, transcoder: PathBuf) -> Orchestrator {
    let mut config = Config::default();
    config.tools.downloader_path = Some(downloader);
    config.tools.transcoder_path = Some(transcoder);
    config.tools.search_path = false;
    config.conversion.max_concurrent_jobs = Some(2);
    config.termination_timeout = Duration::from_secs(5);
    Orchestrator::new(config).unwrap()
}

/// Download-only request writing under `temp_dir`
fn download_request(temp_dir: &Path) -> BatchRequest {
    BatchRequest::new("https://example.com/watch?v=abc", temp_dir.join("downloads"))
}

/// Request converting to mp3 under `temp_dir`
fn convert_request(temp_dir: &Path) -> BatchRequest {
    download_request(temp_dir).with_conversion(TargetFormat::Mp3, temp_dir.join("converted"))
}

/// States announced for `batch`, in order
fn state_changes(events: &[Event], batch: BatchId) -> Vec<BatchState> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::StateChanged { batch: b, state } if *b == batch => Some(*state),
            _ => None,
        })
        .collect()
}

/// Orchestrator status lines, in order
fn orchestrator_lines(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Log { line, .. } if line.source == LogSource::Orchestrator => {
                Some(line.text.clone())
            }
            _ => None,
        })
        .collect()
}

fn count_finished(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::BatchFinished { .. }))
        .count()
}
