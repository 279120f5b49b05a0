use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dufs_supervisor_core::{
    ProcessId, ProcessTerminator, StartRequest, SupervisorError, locate_executable,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A server that dies within this window after spawn is reported as a start
/// failure, not a crash.
const START_GRACE_WINDOW: Duration = Duration::from_millis(500);
/// How long `stop` waits for the root process to be reaped.
const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Polling interval of the exit-watch task.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

type ExitCallback = Box<dyn Fn() + Send + Sync + 'static>;

fn platform_terminator() -> Arc<dyn ProcessTerminator> {
    #[cfg(unix)]
    {
        Arc::new(dufs_supervisor_unix::UnixTerminator::new())
    }

    #[cfg(windows)]
    {
        Arc::new(dufs_supervisor_windows::WindowsTerminator::new())
    }

    #[cfg(not(any(unix, windows)))]
    {
        compile_error!("dufs can only be supervised on Unix or Windows hosts");
    }
}

struct WatchHandle {
    task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

/// Supervises at most one dufs process at a time.
///
/// `start` and `stop` take `&mut self`, so the single-caller discipline the
/// supervisor relies on is enforced by the borrow checker; `is_running` only
/// needs `&self` and is safe to call at any time.
pub struct Supervisor {
    /// Binary to launch instead of the bundled resolution. Used by tests and
    /// non-standard deployments.
    executable_override: Option<PathBuf>,
    /// The single child slot. Occupied exactly while a server is tracked.
    child_slot: Arc<tokio::sync::Mutex<Option<Child>>>,
    /// Stderr accumulated since the last start.
    stderr_buf: Arc<Mutex<String>>,
    /// PID of the tracked process, kept outside the async slot so teardown
    /// can reach it without awaiting.
    tracked_pid: Arc<Mutex<Option<ProcessId>>>,
    terminator: Arc<dyn ProcessTerminator>,
    on_exit: Arc<Mutex<Option<ExitCallback>>>,
    watch: Option<WatchHandle>,
}

impl Supervisor {
    /// Supervisor for the bundled dufs binary, resolved at start time.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Supervisor for a specific server binary.
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self::build(Some(executable.into()))
    }

    fn build(executable_override: Option<PathBuf>) -> Self {
        Self {
            executable_override,
            child_slot: Arc::new(tokio::sync::Mutex::new(None)),
            stderr_buf: Arc::new(Mutex::new(String::new())),
            tracked_pid: Arc::new(Mutex::new(None)),
            terminator: platform_terminator(),
            on_exit: Arc::new(Mutex::new(None)),
            watch: None,
        }
    }

    /// Register the unexpected-exit callback.
    ///
    /// It fires at most once per started instance, from a background task,
    /// and only for exits the supervisor did not itself initiate via
    /// [`stop`](Self::stop). Callers needing a particular thread or executor
    /// context must marshal inside the callback.
    pub fn on_exit(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_exit.lock().unwrap() = Some(Box::new(callback));
    }

    /// Start the server.
    ///
    /// Success means the process outlived the grace window; that is an
    /// optimistic liveness check, a server can still crash right after it
    /// (reported through the exit callback). A process that dies inside the
    /// window is reported as [`SupervisorError::ImmediateExit`] carrying its
    /// stderr, and the supervisor is idle again when this returns.
    pub async fn start(&mut self, request: &StartRequest) -> Result<(), SupervisorError> {
        if self.is_running().await {
            return Err(SupervisorError::AlreadyRunning);
        }

        // A watch left over from a crashed instance must not survive into
        // this one: it shares the slot and callback Arcs and would fire for
        // exits it no longer owns.
        if let Some(watch) = self.watch.take() {
            watch.cancel.cancel();
            let _ = watch.task.await;
        }

        let executable = match &self.executable_override {
            Some(path) => path.clone(),
            None => locate_executable()?,
        };
        if !executable.is_file() {
            return Err(SupervisorError::ExecutableNotFound(executable));
        }

        let args = request.to_args();
        self.stderr_buf.lock().unwrap().clear();

        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so stop() can take the whole tree down at once.
        #[cfg(unix)]
        cmd.process_group(0);

        // CREATE_NO_WINDOW: the server must not pop a console.
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000);

        let mut child = cmd.spawn().map_err(SupervisorError::SpawnFailed)?;

        if let Some(pid) = child.id() {
            info!(pid = %pid, executable = %executable.display(), args = ?args, "spawned dufs");
        }

        self.attach_capture(&mut child);

        // Suspension point: the capture tasks keep draining while we wait.
        tokio::time::sleep(START_GRACE_WINDOW).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                let diagnostic = self.captured_stderr();
                let exit_code = status.code();
                warn!(exit_code = ?exit_code, "dufs exited inside the grace window");
                Err(SupervisorError::immediate_exit(diagnostic, exit_code))
            }
            Ok(None) => {
                *self.tracked_pid.lock().unwrap() = child.id().map(ProcessId::from);
                *self.child_slot.lock().await = Some(child);
                self.spawn_exit_watch();
                Ok(())
            }
            Err(e) => {
                let _ = child.start_kill();
                Err(SupervisorError::SpawnFailed(e))
            }
        }
    }

    /// Stop the server and its whole process tree, waiting up to five
    /// seconds for the root to be reaped.
    ///
    /// A no-op when nothing is running. The child slot is released on every
    /// path, including [`SupervisorError::TerminationFailed`], so a failed
    /// stop never leaves a stale handle behind.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        // Cancel the watch first so a caller-initiated stop never looks like
        // a crash to the exit callback.
        if let Some(watch) = self.watch.take() {
            watch.cancel.cancel();
            let _ = watch.task.await;
        }

        let Some(mut child) = self.child_slot.lock().await.take() else {
            self.tracked_pid.lock().unwrap().take();
            return Ok(());
        };
        self.tracked_pid.lock().unwrap().take();

        let result = match child.id().map(ProcessId::from) {
            Some(pid) => {
                let outcome = self.terminator.terminate_tree(pid).await;
                if outcome.succeeded() {
                    match tokio::time::timeout(STOP_WAIT_TIMEOUT, child.wait()).await {
                        Ok(Ok(status)) => {
                            info!(status = %status, "dufs stopped");
                            Ok(())
                        }
                        Ok(Err(e)) => Err(SupervisorError::TerminationFailed(e.to_string())),
                        Err(_) => Err(SupervisorError::TerminationFailed(
                            "timed out waiting for process exit".to_string(),
                        )),
                    }
                } else {
                    warn!(pid = %pid, outcome = %outcome, "failed to terminate dufs");
                    Err(SupervisorError::TerminationFailed(outcome.to_string()))
                }
            }
            // No PID means the process already exited; reap and move on.
            None => {
                let _ = child.try_wait();
                Ok(())
            }
        };

        // `child` drops here on every path; OS handles are released and the
        // slot is already empty.
        result
    }

    /// Whether the tracked process, if any, has not exited. Derived from the
    /// handle on every call, never cached; an observed exit clears the slot.
    pub async fn is_running(&self) -> bool {
        let mut slot = self.child_slot.lock().await;
        match slot.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    info!(status = %status, "dufs has exited");
                    *slot = None;
                    self.tracked_pid.lock().unwrap().take();
                    false
                }
                // An unpollable child cannot stay in the slot: a later start
                // would sail past the AlreadyRunning gate and overwrite a
                // possibly live process.
                Err(e) => {
                    warn!(error = %e, "could not poll dufs for exit");
                    *slot = None;
                    self.tracked_pid.lock().unwrap().take();
                    false
                }
            },
            None => false,
        }
    }

    /// PID of the tracked process, if one is running.
    pub async fn pid(&self) -> Option<ProcessId> {
        self.child_slot
            .lock()
            .await
            .as_ref()
            .and_then(|child| child.id())
            .map(ProcessId::from)
    }

    /// Stderr text accumulated since the last start, trimmed.
    pub fn captured_stderr(&self) -> String {
        self.stderr_buf.lock().unwrap().trim().to_string()
    }

    /// Line-buffered capture of the child's output streams. Stderr feeds the
    /// diagnostic buffer; stdout is drained so the pipe never fills up.
    fn attach_capture(&self, child: &mut Child) {
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&self.stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "dufs stderr");
                    let mut buf = buf.lock().unwrap();
                    buf.push_str(&line);
                    buf.push('\n');
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "dufs stdout");
                }
            });
        }
    }

    /// Watch task: polls the child slot and fires the exit callback once if
    /// the server goes away without a stop request.
    fn spawn_exit_watch(&mut self) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let slot = Arc::clone(&self.child_slot);
        let tracked_pid = Arc::clone(&self.tracked_pid);
        let on_exit = Arc::clone(&self.on_exit);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
                }

                let exited = {
                    let mut slot = slot.lock().await;
                    match slot.as_mut() {
                        // An is_running() call already reaped the child.
                        None => true,
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                warn!(status = %status, "dufs exited without a stop request");
                                *slot = None;
                                true
                            }
                            Ok(None) => false,
                            Err(e) => {
                                warn!(error = %e, "could not poll dufs for exit");
                                *slot = None;
                                true
                            }
                        },
                    }
                };

                if exited {
                    tracked_pid.lock().unwrap().take();
                    if let Some(callback) = on_exit.lock().unwrap().as_ref() {
                        callback();
                    }
                    return;
                }
            }
        });

        self.watch = Some(WatchHandle { task, cancel });
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.cancel.cancel();
            watch.task.abort();
        }

        // Teardown must not fail: kill whatever is still tracked and discard
        // errors. The pid lives outside the async slot, so this works even
        // if the watch task still holds the slot lock.
        let pid = self.tracked_pid.lock().unwrap().take();
        if let Some(pid) = pid {
            self.terminator.kill_tree_blocking(pid);
        }
        if let Ok(mut slot) = self.child_slot.try_lock() {
            slot.take();
        }
    }
}
