//! Shared test helpers: fake downloader/transcoder scripts and event collection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::types::Event;

/// Write an executable `/bin/sh` script into `dir`
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Fake downloader: prints to stdout and stderr, then creates `files` in the
/// directory of the `-o` template
pub(crate) fn fake_downloader(dir: &Path, files: &[&str]) -> PathBuf {
    let mut body = String::from(
        r#"template="$2"
url="$3"
out=$(dirname "$template")
mkdir -p "$out"
echo "[generic] Extracting URL: $url"
echo "WARNING: fake downloader" >&2
"#,
    );
    for file in files {
        body.push_str(&format!(
            "echo \"[download] Destination: $out/{file}\"\n: > \"$out/{file}\"\n"
        ));
    }
    body.push_str("echo \"[download] 100% done\"\n");
    write_script(dir, "fake-yt-dlp", &body)
}

/// Fake transcoder
///
/// Fails for sources whose name contains `fail`, otherwise sleeps briefly and
/// creates the destination. When `concurrency_log` is given, writes `start`
/// and `end` markers to it so tests can compute peak parallelism.
pub(crate) fn fake_transcoder(dir: &Path, concurrency_log: Option<&Path>) -> PathBuf {
    let log = concurrency_log
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/dev/null".to_string());
    let body = format!(
        r#"for last; do :; done
src=""
prev=""
for arg; do
  if [ "$prev" = "-i" ]; then src="$arg"; fi
  prev="$arg"
done
echo start >> "{log}"
echo "Input #0, from '$src'"
sleep 0.2
case "$src" in
  *fail*)
    echo "$src: Invalid data found when processing input" >&2
    echo end >> "{log}"
    exit 1
    ;;
esac
: > "$last"
echo "size=     512kB time=00:00:10.00"
echo end >> "{log}"
"#
    );
    write_script(dir, "fake-ffmpeg", &body)
}

/// Transcoder that SIGKILLs itself for sources whose name contains `crash`
/// and otherwise creates the destination
pub(crate) fn crashing_transcoder(dir: &Path) -> PathBuf {
    let body = r#"for last; do :; done
case "$2" in
  *crash*)
    echo "decoding $2"
    kill -9 $$
    ;;
esac
: > "$last"
"#;
    write_script(dir, "crashing-ffmpeg", body)
}

/// Tool that prints one line and then blocks until killed
pub(crate) fn slow_tool(dir: &Path, name: &str) -> PathBuf {
    write_script(dir, name, "echo started\nexec sleep 30\n")
}

/// Peak number of overlapping `start`/`end` intervals in a concurrency log
pub(crate) fn peak_concurrency(log: &Path) -> usize {
    let contents = std::fs::read_to_string(log).unwrap_or_default();
    let mut running = 0usize;
    let mut peak = 0usize;
    for line in contents.lines() {
        match line {
            "start" => {
                running += 1;
                peak = peak.max(running);
            }
            "end" => running = running.saturating_sub(1),
            _ => {}
        }
    }
    peak
}

/// Collect every event currently buffered in `rx`
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds or `timeout` elapses
pub(crate) async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
