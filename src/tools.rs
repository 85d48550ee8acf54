//! External tool discovery and command-line construction
//!
//! The downloader and transcoder are located once per batch, either from an
//! explicit path in [`ToolsConfig`] or by searching `PATH` with the `which`
//! crate, and then invoked with the argument layouts below.

use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::process::CommandLine;
use crate::types::ConversionJob;

/// Output template handed to the downloader; the tool fills in title and extension
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Resolved executable paths for one batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    /// Downloader executable
    pub downloader: PathBuf,
    /// Transcoder executable (only resolved when conversion was requested)
    pub transcoder: Option<PathBuf>,
}

impl ToolPaths {
    /// Locate the downloader, and the transcoder if `need_transcoder` is set
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] naming the first tool that cannot be found.
    pub fn resolve(config: &ToolsConfig, need_transcoder: bool) -> Result<Self> {
        let downloader = resolve_tool(
            config.downloader_path.as_deref(),
            &config.downloader_name,
            config.search_path,
        )?;
        let transcoder = if need_transcoder {
            Some(resolve_tool(
                config.transcoder_path.as_deref(),
                &config.transcoder_name,
                config.search_path,
            )?)
        } else {
            None
        };
        Ok(Self {
            downloader,
            transcoder,
        })
    }
}

/// Find one executable
///
/// An explicit path must point at an existing file. Otherwise `name` is looked
/// up in `PATH` when `search_path` is enabled.
pub fn resolve_tool(explicit: Option<&Path>, name: &str, search_path: bool) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::launch(
            name,
            format!("configured path {} does not exist", path.display()),
        ));
    }

    if !search_path {
        return Err(Error::launch(
            name,
            "no path configured and PATH search is disabled",
        ));
    }

    which::which(name).map_err(|e| Error::launch(name, format!("not found in PATH: {}", e)))
}

/// `<downloader> -o <output_dir>/%(title)s.%(ext)s <url>`
pub fn download_command(downloader: &Path, url: &str, output_dir: &Path) -> CommandLine {
    let template = output_dir.join(OUTPUT_TEMPLATE);
    CommandLine::new(downloader)
        .arg("-o")
        .arg(template.to_string_lossy())
        .arg(url)
}

/// `<transcoder> -i <source> [-threads <N>] <destination>`
pub fn transcode_command(
    transcoder: &Path,
    job: &ConversionJob,
    threads: Option<usize>,
) -> CommandLine {
    let mut command = CommandLine::new(transcoder)
        .arg("-i")
        .arg(job.source_file.to_string_lossy());
    if let Some(threads) = threads {
        command = command.arg("-threads").arg(threads.to_string());
    }
    command.arg(job.destination_path().to_string_lossy())
}
