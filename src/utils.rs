//! Utility functions for directory listing and file naming

use crate::error::Result;
use crate::types::{ConversionJob, TargetFormat};
use std::path::{Path, PathBuf};

/// Container extensions picked up for conversion (matched case-insensitively)
pub const CONTAINER_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];

/// Strip the last extension segment from a file name
///
/// Only the final `.ext` is removed, so `movie.2024.mkv` becomes `movie.2024`.
/// Names without a dot, and dot-files such as `.mkv`, are returned unchanged.
///
/// # Examples
///
/// ```
/// use vd_master::utils::strip_last_extension;
///
/// assert_eq!(strip_last_extension("movie.2024.mkv"), "movie.2024");
/// assert_eq!(strip_last_extension("README"), "README");
/// ```
pub fn strip_last_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    }
}

/// Check whether a path has one of the [`CONTAINER_EXTENSIONS`]
pub fn is_container_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let stem = strip_last_extension(name);
    if stem.len() == name.len() {
        return false;
    }
    let ext = &name[stem.len() + 1..];
    CONTAINER_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
}

/// List regular files directly inside `dir`, sorted by path
///
/// A missing directory yields an empty list; other I/O errors are returned.
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = ?dir, "directory does not exist, nothing to list");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                tracing::warn!(path = ?entry.path(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Derive the conversion jobs for a download directory
///
/// Every container file directly inside `source_dir` becomes one job writing
/// into `destination_dir`. Jobs are ordered by source path so the same
/// directory contents always produce the same job list.
pub async fn list_conversion_jobs(
    source_dir: &Path,
    format: TargetFormat,
    destination_dir: &Path,
) -> Result<Vec<ConversionJob>> {
    let jobs = list_files(source_dir)
        .await?
        .into_iter()
        .filter(|path| is_container_file(path))
        .map(|path| ConversionJob::new(path, format, destination_dir))
        .collect();
    Ok(jobs)
}

/// Number of available processing units (at least 1)
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
