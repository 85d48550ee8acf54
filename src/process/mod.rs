//! Child process supervision
//!
//! A [`ChildProcess`] wraps one external tool run. stdout and stderr share a
//! single OS pipe, so the lines read back keep the order the child wrote them
//! in. The OS child itself is owned by a supervisor task that selects between
//! process exit and termination requests; everything else talks to it through
//! a shared [`ProcessHandle`].
//!
//! ```text
//!   child stdout ─┐
//!                 ├─ pipe ─> reader thread ─> mpsc ─> ChildProcess::next_line()
//!   child stderr ─┘
//!
//!   ProcessHandle::terminate() ─> watch ─> supervisor ─> SIGTERM / kill
//!                                            │
//!                                            └─> ProcessState + registry removal
//! ```

mod output;
mod registry;

pub use registry::ProcessRegistry;

use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::Stream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::types::{ProcessId, ProcessState};

/// How long reads keep draining buffered output after the process was killed
///
/// A grandchild that inherited the pipe can keep it open indefinitely, so
/// reads stop waiting for end-of-stream once this elapses.
const KILLED_OUTPUT_GRACE: Duration = Duration::from_millis(250);

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// Program plus argument tokens
///
/// Arguments are passed to the OS as-is; nothing is interpreted by a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<String>,
}

impl CommandLine {
    /// Start a command line for `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// File name of the program, used in launch errors
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Termination request, ordered by strength
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Termination {
    None,
    Graceful,
    Forced,
}

/// Shared control handle for one child process
///
/// Held by the spawner's [`ChildProcess`], by the supervisor task, and by the
/// [`ProcessRegistry`]. It never touches the OS child directly.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    label: String,
    pid: Option<u32>,
    state: watch::Sender<ProcessState>,
    termination: watch::Sender<Termination>,
    stream_failed: AtomicBool,
}

impl ProcessHandle {
    /// Crate-assigned process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Label used in logs (tool name or source file name)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// Ask the process to stop
    ///
    /// `forced = false` sends a cooperative stop request (SIGTERM on Unix) and
    /// returns immediately. `forced = true` kills unconditionally. A weaker
    /// request never replaces a stronger one, and terminating a process that
    /// already finished does nothing.
    pub fn terminate(&self, forced: bool) {
        if self.state().is_terminal() {
            return;
        }
        let requested = if forced {
            Termination::Forced
        } else {
            Termination::Graceful
        };
        let escalated = self.termination.send_if_modified(|current| {
            if requested > *current {
                *current = requested;
                true
            } else {
                false
            }
        });
        if escalated {
            tracing::debug!(process = %self.label, id = %self.id, forced, "termination requested");
        }
    }

    fn termination_requested(&self) -> bool {
        *self.termination.borrow() != Termination::None
    }

    /// Record the terminal state; only the first call has an effect
    fn finish(&self, final_state: ProcessState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = final_state;
                true
            }
        })
    }
}

/// Outcome of one `next_line` receive
enum Received {
    Line(Option<io::Result<String>>),
    Killed,
}

/// A spawned child process owned by its spawner
///
/// Read output with [`next_line`](Self::next_line) or
/// [`lines`](Self::lines), then collect the final state with
/// [`wait`](Self::wait).
pub struct ChildProcess {
    handle: Arc<ProcessHandle>,
    registry: Arc<ProcessRegistry>,
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
    state_rx: watch::Receiver<ProcessState>,
    supervisor: JoinHandle<ProcessState>,
    killed: bool,
    finished: bool,
}

impl ChildProcess {
    /// Spawn `command` with merged output and register it in `registry`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] when the pipe cannot be created, the
    /// executable is missing, or the OS refuses to start it.
    pub fn spawn(
        command: CommandLine,
        label: impl Into<String>,
        registry: &Arc<ProcessRegistry>,
    ) -> Result<Self> {
        let label = label.into();
        let tool = command.program_name();

        let (reader, writer) = io::pipe().map_err(|e| Error::launch(&tool, e))?;
        let stderr_writer = writer.try_clone().map_err(|e| Error::launch(&tool, e))?;

        let child = {
            let mut cmd = Command::new(&command.program);
            cmd.args(&command.args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr_writer)
                .kill_on_drop(true);
            cmd.spawn().map_err(|e| Error::launch(&tool, e))?
            // `cmd` drops here, closing our copies of the write end
        };

        let id = ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed));
        let pid = child.id();
        let (state_tx, state_rx) = watch::channel(ProcessState::Starting);
        let (termination_tx, termination_rx) = watch::channel(Termination::None);
        let handle = Arc::new(ProcessHandle {
            id,
            label,
            pid,
            state: state_tx,
            termination: termination_tx,
            stream_failed: AtomicBool::new(false),
        });

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let thread_name = format!("vd-output-{}", id);
        let reader_thread = std::thread::Builder::new().name(thread_name).spawn(move || {
            let result = output::split_lines(BufReader::new(reader), |line| {
                line_tx.send(Ok(line)).is_ok()
            });
            if let Err(e) = result {
                line_tx.send(Err(e)).ok();
            }
        });
        if let Err(e) = reader_thread {
            // `child` is dropped on return and killed with it
            return Err(Error::launch(&tool, e));
        }

        tracing::debug!(
            process = %handle.label,
            id = %id,
            pid = ?pid,
            command = %command,
            "spawned child process"
        );

        registry.register(Arc::clone(&handle));
        let supervisor = tokio::spawn(supervise(
            child,
            Arc::clone(&handle),
            termination_rx,
            Arc::clone(registry),
        ));

        Ok(Self {
            handle,
            registry: Arc::clone(registry),
            lines: line_rx,
            state_rx,
            supervisor,
            killed: false,
            finished: false,
        })
    }

    /// Shared control handle
    pub fn handle(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }

    /// Next line of merged output, or `None` once the output closed
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamRead`] if reading the pipe failed. The process
    /// is force-terminated and later calls return `Ok(None)`.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let received = if self.killed {
                let line = tokio::time::timeout(KILLED_OUTPUT_GRACE, self.lines.recv()).await;
                Received::Line(line.unwrap_or(None))
            } else {
                tokio::select! {
                    biased;
                    line = self.lines.recv() => Received::Line(line),
                    _ = wait_killed(&mut self.state_rx) => Received::Killed,
                }
            };

            match received {
                Received::Killed => self.killed = true,
                Received::Line(Some(Ok(line))) => return Ok(Some(line)),
                Received::Line(None) => {
                    self.finished = true;
                    return Ok(None);
                }
                Received::Line(Some(Err(source))) => {
                    self.finished = true;
                    tracing::warn!(
                        process = %self.handle.label,
                        error = %source,
                        "reading child output failed"
                    );
                    self.handle.stream_failed.store(true, Ordering::SeqCst);
                    self.handle.terminate(true);
                    return Err(Error::StreamRead {
                        process: self.handle.label.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Merged output as a stream of lines
    pub fn lines(&mut self) -> impl Stream<Item = Result<String>> + '_ {
        futures::stream::unfold(self, |child| async move {
            match child.next_line().await {
                Ok(Some(line)) => Some((Ok(line), child)),
                Ok(None) => None,
                Err(e) => Some((Err(e), child)),
            }
        })
    }

    /// Wait until the process reached a terminal state
    pub async fn wait(self) -> ProcessState {
        let ChildProcess {
            handle,
            registry,
            lines,
            supervisor,
            ..
        } = self;

        let state = match supervisor.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(process = %handle.label, error = %e, "process supervisor failed");
                let state = ProcessState::Exited { code: None };
                handle.finish(state);
                registry.unregister(handle.id);
                state
            }
        };
        drop(lines);
        state
    }
}

async fn wait_killed(state: &mut watch::Receiver<ProcessState>) {
    if state.wait_for(|s| *s == ProcessState::Killed).await.is_err() {
        // The handle outlives this receiver, so the sender cannot be gone;
        // report killed rather than spin.
        tracing::trace!("process state channel closed");
    }
}

/// Own the OS child until it exits, applying termination requests
async fn supervise(
    mut child: Child,
    handle: Arc<ProcessHandle>,
    mut termination: watch::Receiver<Termination>,
    registry: Arc<ProcessRegistry>,
) -> ProcessState {
    handle.state.send_if_modified(|state| {
        if *state == ProcessState::Starting {
            *state = ProcessState::Running;
            true
        } else {
            false
        }
    });

    let mut applied = Termination::None;
    let status = loop {
        let requested = *termination.borrow_and_update();
        if requested > applied {
            apply_termination(&mut child, requested, &handle);
            applied = requested;
        }

        tokio::select! {
            status = child.wait() => break status,
            changed = termination.changed() => {
                if changed.is_err() {
                    break child.wait().await;
                }
            }
        }
    };

    let final_state = match status {
        Ok(status) => classify_exit(status, &handle),
        Err(e) => {
            tracing::warn!(process = %handle.label, error = %e, "waiting for child failed");
            ProcessState::Exited { code: None }
        }
    };

    handle.finish(final_state);
    registry.unregister(handle.id);
    tracing::debug!(
        process = %handle.label,
        id = %handle.id,
        state = ?final_state,
        "child process finished"
    );
    final_state
}

fn classify_exit(status: ExitStatus, handle: &ProcessHandle) -> ProcessState {
    if handle.stream_failed.load(Ordering::SeqCst) {
        return ProcessState::Exited { code: None };
    }
    if handle.termination_requested() && !status.success() {
        return ProcessState::Killed;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal().is_some() {
            return ProcessState::Killed;
        }
    }
    ProcessState::Exited {
        code: status.code(),
    }
}

fn apply_termination(child: &mut Child, request: Termination, handle: &ProcessHandle) {
    let result = match request {
        Termination::None => return,
        Termination::Graceful => request_stop(child),
        Termination::Forced => child.start_kill(),
    };
    match result {
        Ok(()) => {
            tracing::debug!(
                process = %handle.label,
                pid = ?handle.pid,
                request = ?request,
                "signalled child process"
            );
        }
        Err(e) => {
            tracing::warn!(process = %handle.label, error = %e, "failed to signal child, killing");
            if let Err(e) = child.start_kill() {
                tracing::warn!(process = %handle.label, error = %e, "failed to kill child process");
            }
        }
    }
}

/// Send SIGTERM to a child that has not been reaped yet
#[cfg(unix)]
fn request_stop(child: &mut Child) -> io::Result<()> {
    // `id()` is None once the child was reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;

    // SAFETY: kill(2) takes no pointers. The pid belongs to a child owned by
    // this task that has not been reaped, so it cannot name another process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
