//! Stand-in downloader and transcoder scripts
//!
//! The scripts accept the same argument layout vd-master passes to the real
//! tools, so a batch runs end to end without network access or codecs.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vd_master::{BatchRequest, Config, Orchestrator, TargetFormat};

/// Source URL used by every test request
pub const TEST_URL: &str = "https://example.com/playlist?list=test";

/// Write an executable shell script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
    path
}

/// Downloader that creates `files` next to its `-o` template
///
/// Arguments: `-o <template> <url>`
pub fn downloader_script(dir: &Path, files: &[&str]) -> PathBuf {
    let mut body = String::from(
        r#"out=$(dirname "$2")
mkdir -p "$out"
echo "[youtube:tab] Downloading playlist: $3"
"#,
    );
    for (index, file) in files.iter().enumerate() {
        body.push_str(&format!(
            "echo \"[download] Downloading item {n} of {total}\"\n: > \"$out/{file}\"\n",
            n = index + 1,
            total = files.len()
        ));
    }
    body.push_str("echo \"[download] Finished downloading playlist\"\n");
    write_script(dir, "yt-dlp", &body)
}

/// Transcoder that touches its destination (the last argument)
///
/// Sources whose name contains `corrupt` fail with exit code 1.
pub fn transcoder_script(dir: &Path) -> PathBuf {
    let body = r#"src=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then src="$arg"; fi
  prev="$arg"
  dest="$arg"
done
echo "Input #0, from '$src':"
case "$src" in
  *corrupt*) echo "$src: Invalid data found when processing input" >&2; exit 1 ;;
esac
sleep 0.1
: > "$dest"
echo "size=       1kB time=00:00:01.00"
"#;
    write_script(dir, "ffmpeg", body)
}

/// Tool that never finishes on its own
pub fn hanging_script(dir: &Path, name: &str) -> PathBuf {
    write_script(dir, name, "echo \"running\"\nexec sleep 60\n")
}

/// Orchestrator with explicit tool paths and a small pool
pub fn create_orchestrator(downloader: PathBuf, transcoder: PathBuf) -> Orchestrator {
    let mut config = Config::default();
    config.tools.downloader_path = Some(downloader);
    config.tools.transcoder_path = Some(transcoder);
    config.tools.search_path = false;
    config.conversion.max_concurrent_jobs = Some(2);
    config.termination_timeout = Duration::from_secs(5);
    Orchestrator::new(config).expect("Failed to create orchestrator")
}

/// Download into `root/videos`, convert to `format` into `root/audio`
pub fn convert_request(root: &Path, format: TargetFormat) -> BatchRequest {
    BatchRequest::new(TEST_URL, root.join("videos")).with_conversion(format, root.join("audio"))
}
