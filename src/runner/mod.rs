//! Child-process execution with timeout, cancellation and line streaming.

pub mod diagnostics;
pub mod output;

use crate::errors::{AppError, AppResult};
use crate::models::ExecutionResult;
use diagnostics::{describe_spawn_error, environment_failure};
use output::{choose_output, sanitize_line, CapturedOutput, LineSplitter, MAX_PENDING_BYTES};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};

/// Exit status reported for a command killed by the timeout, as `timeout(1)` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit status reported for a command interrupted by the user (128 + SIGINT).
pub const CANCELED_EXIT_CODE: i32 = 130;

const TERMINATE_GRACE: Duration = Duration::from_millis(1_500);
const KILL_WAIT: Duration = Duration::from_secs(2);
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);
const SYNTAX_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK_BYTES: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Shared flag a caller flips to interrupt whatever is running under it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|canceled| *canceled).await;
    }
}

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Canceled,
}

type StreamCapture = Arc<StdMutex<CapturedOutput>>;

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: String,
    cwd: Option<PathBuf>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ProcessRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub async fn run(&self, command: &str, limit: Duration) -> AppResult<ExecutionResult> {
        self.run_streaming(command, limit, &CancelHandle::new(), |_| {}).await
    }

    pub async fn run_cancellable(
        &self,
        command: &str,
        limit: Duration,
        cancel: &CancelHandle,
    ) -> AppResult<ExecutionResult> {
        self.run_streaming(command, limit, cancel, |_| {}).await
    }

    /// Runs `command`, handing each output line to `on_line` as it arrives.
    ///
    /// Non-zero exits and timeouts are ordinary results. Spawn failures and the
    /// shell's not-found/not-executable statuses are `AppError::Environment`;
    /// cancellation is `AppError::Canceled`.
    pub async fn run_streaming<F>(
        &self,
        command: &str,
        limit: Duration,
        cancel: &CancelHandle,
        mut on_line: F,
    ) -> AppResult<ExecutionResult>
    where
        F: FnMut(&OutputLine),
    {
        if cancel.is_canceled() {
            return Err(AppError::Canceled("canceled before the command started".to_string()));
        }

        let mut child = self.spawn(command)?;
        let pid = child.id();
        tracing::debug!(pid = ?pid, timeout_ms = limit.as_millis() as u64, "command spawned");

        let (sender, mut receiver) = mpsc::unbounded_channel::<OutputLine>();
        let stdout_capture: StreamCapture = Arc::default();
        let stderr_capture: StreamCapture = Arc::default();
        let mut readers = Vec::new();
        if let Some(stream) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                stream,
                OutputStream::Stdout,
                stdout_capture.clone(),
                sender.clone(),
            )));
        }
        if let Some(stream) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                stream,
                OutputStream::Stderr,
                stderr_capture.clone(),
                sender.clone(),
            )));
        }
        drop(sender);

        let deadline = Instant::now() + limit;
        let ending = loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status
                        .map_err(|error| AppError::Io(format!("failed to wait for process: {}", error)))?;
                    break Ending::Exited(status);
                }
                _ = tokio::time::sleep_until(deadline) => break Ending::TimedOut,
                _ = cancel.cancelled() => break Ending::Canceled,
                Some(line) = receiver.recv() => on_line(&line),
            }
        };

        if !matches!(ending, Ending::Exited(_)) {
            terminate_then_kill(&mut child, pid).await;
        }
        drain_readers(readers, &mut receiver, &mut on_line).await;

        let output = choose_output(&joined(&stdout_capture), &joined(&stderr_capture));
        match ending {
            Ending::Exited(status) => {
                let exit_code = exit_code_of(status);
                if let Some(message) = environment_failure(exit_code, &output) {
                    return Err(AppError::Environment(message));
                }
                Ok(ExecutionResult {
                    output,
                    exit_code,
                    timed_out: false,
                })
            }
            Ending::TimedOut => {
                tracing::warn!(pid = ?pid, timeout_ms = limit.as_millis() as u64, "command timed out");
                let output = if output.is_empty() {
                    format!("Command timed out after {:.1}s", limit.as_secs_f64())
                } else {
                    output
                };
                Ok(ExecutionResult {
                    output,
                    exit_code: TIMEOUT_EXIT_CODE,
                    timed_out: true,
                })
            }
            Ending::Canceled => {
                tracing::info!(pid = ?pid, "command canceled");
                Err(AppError::Canceled("command interrupted by user".to_string()))
            }
        }
    }

    /// Asks the shell to parse `script` without running it.
    ///
    /// Returns the shell's complaint, or `None` when the script parsed or the
    /// check itself could not run.
    pub async fn check_syntax(&self, script: &str) -> Option<String> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-n")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = match timeout(SYNTAX_CHECK_TIMEOUT, command.output()).await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                tracing::debug!(error = %error, "syntax check could not run");
                return None;
            }
            Err(_) => {
                tracing::debug!("syntax check timed out");
                return None;
            }
        };

        if result.status.success() {
            return None;
        }
        let stderr = String::from_utf8_lossy(&result.stderr);
        let stdout = String::from_utf8_lossy(&result.stdout);
        let complaint = choose_output(&stderr, &stdout);
        Some(if complaint.is_empty() {
            "syntax check failed".to_string()
        } else {
            complaint
        })
    }

    fn spawn(&self, script: &str) -> AppResult<Child> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|error| AppError::Environment(describe_spawn_error(&error, &self.shell)))
    }
}

async fn pump<R>(stream: R, kind: OutputStream, capture: StreamCapture, sender: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = stream;
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut splitter = LineSplitter::new(Some(MAX_PENDING_BYTES));
    let emit = |raw: &str| {
        let text = sanitize_line(raw);
        if let Ok(mut captured) = capture.lock() {
            captured.push(text.clone());
        }
        let _ = sender.send(OutputLine { stream: kind, text });
    };

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(size) => {
                let text = String::from_utf8_lossy(&chunk[..size]);
                for line in splitter.push(&text) {
                    emit(&line);
                }
                let dropped = splitter.take_dropped_bytes();
                if dropped > 0 {
                    tracing::warn!(stream = ?kind, bytes = dropped, "output line exceeded buffer; bytes dropped");
                }
            }
            Err(error) => {
                tracing::debug!(stream = ?kind, error = %error, "output read failed");
                break;
            }
        }
    }

    let rest = splitter.finish();
    if !rest.is_empty() {
        emit(&rest);
    }
}

async fn drain_readers<F>(
    readers: Vec<JoinHandle<()>>,
    receiver: &mut mpsc::UnboundedReceiver<OutputLine>,
    on_line: &mut F,
) where
    F: FnMut(&OutputLine),
{
    let drained = timeout(READER_DRAIN_GRACE, async {
        while let Some(line) = receiver.recv().await {
            on_line(&line);
        }
    })
    .await;

    if drained.is_err() {
        // Something outside the process group still holds the pipes open.
        tracing::debug!("output readers did not finish; abandoning them");
        for reader in readers {
            reader.abort();
        }
    }
}

async fn terminate_then_kill(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        let _ = child.start_kill();
    }

    if timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
        return;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.start_kill();
    if timeout(KILL_WAIT, child.wait()).await.is_err() {
        tracing::error!(pid = ?pid, "process did not exit after kill");
    }
}

fn joined(capture: &StreamCapture) -> String {
    capture
        .lock()
        .map(|captured| {
            if captured.evicted_lines() > 0 {
                tracing::debug!(evicted = captured.evicted_lines(), "captured output truncated to its tail");
            }
            captured.joined()
        })
        .unwrap_or_default()
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::{CancelHandle, OutputStream, ProcessRunner, TIMEOUT_EXIT_CODE};
    use crate::errors::AppError;
    use std::time::{Duration, Instant};

    const LIMIT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn captures_stdout_and_exit_status() {
        let runner = ProcessRunner::default();
        let result = runner.run("echo hello; echo world", LIMIT).await.expect("run");
        assert_eq!(result.output, "hello\nworld");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn falls_back_to_stderr_when_stdout_is_empty() {
        let runner = ProcessRunner::default();
        let result = runner.run("echo oops >&2; exit 3", LIMIT).await.expect("run");
        assert_eq!(result.output, "oops");
        assert_eq!(result.exit_code, 3);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn timeout_kills_the_process_and_reports_124() {
        let runner = ProcessRunner::default();
        let started = Instant::now();
        let result = runner
            .run("echo partial; sleep 30", Duration::from_millis(300))
            .await
            .expect("run");
        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.output, "partial");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_command_is_an_environment_error() {
        let runner = ProcessRunner::default();
        let error = runner
            .run("definitely-not-a-real-command-xyz", LIMIT)
            .await
            .expect_err("should fail");
        assert!(matches!(error, AppError::Environment(message) if message.starts_with("command not found")));
    }

    #[tokio::test]
    async fn missing_shell_is_an_environment_error() {
        let runner = ProcessRunner::new("/nonexistent/shell");
        let error = runner.run("true", LIMIT).await.expect_err("should fail");
        assert!(matches!(error, AppError::Environment(_)));
    }

    #[tokio::test]
    async fn streams_lines_as_they_arrive() {
        let runner = ProcessRunner::default();
        let mut seen = Vec::new();
        let result = runner
            .run_streaming(
                "echo one; echo two >&2; echo three",
                LIMIT,
                &CancelHandle::new(),
                |line| seen.push((line.stream, line.text.clone())),
            )
            .await
            .expect("run");

        assert_eq!(result.output, "one\nthree");
        assert!(seen.contains(&(OutputStream::Stdout, "one".to_string())));
        assert!(seen.contains(&(OutputStream::Stderr, "two".to_string())));
        assert!(seen.contains(&(OutputStream::Stdout, "three".to_string())));
    }

    #[tokio::test]
    async fn cancel_terminates_the_command() {
        let runner = ProcessRunner::default();
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let error = runner
            .run_cancellable("sleep 30", LIMIT, &cancel)
            .await
            .expect_err("canceled");
        assert!(matches!(error, AppError::Canceled(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn already_canceled_handle_never_spawns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("marker");
        let cancel = CancelHandle::new();
        cancel.cancel();

        let runner = ProcessRunner::default();
        let result = runner
            .run_cancellable(&format!("touch {}", marker.display()), LIMIT, &cancel)
            .await;
        assert!(matches!(result, Err(AppError::Canceled(_))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn runs_in_the_configured_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::default().with_cwd(dir.path());
        let result = runner.run("touch created && ls", LIMIT).await.expect("run");
        assert_eq!(result.output, "created");
    }

    #[tokio::test]
    async fn syntax_check_is_advisory() {
        let runner = ProcessRunner::default();
        assert!(runner.check_syntax("echo fine").await.is_none());
        assert!(runner.check_syntax("if then fi (").await.is_some());
        assert!(ProcessRunner::new("/nonexistent/shell").check_syntax("echo").await.is_none());
    }
}
