//! External generator process runner.
//!
//! Launches one generator invocation, frames its stdout into lines, feeds
//! each line through [`parse_line`](crate::parser::parse_line) and forwards
//! the resulting events as they arrive. Stderr is drained concurrently and
//! kept for error reporting.

mod lines;

pub use lines::LineBuffer;

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chatrelay_common::{RunnerError, ServerMessage};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::parser::parse_line;

const READ_CHUNK: usize = 8 * 1024;

/// How long a cancelled run waits for stderr to close. A grandchild that
/// inherited the pipe can keep it open after the generator itself is gone.
const CANCEL_STDERR_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pid: Option<u32>,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub cancelled: bool,
}

pub type RunResult = Result<RunSummary, RunnerError>;

/// Launch settings shared by every invocation.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    working_dir: Option<PathBuf>,
    strip_env: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            strip_env: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_strip_env(mut self, vars: Vec<String>) -> Self {
        self.strip_env = vars;
        self
    }

    /// Run the generator to completion, forwarding each parsed event to
    /// `on_event` as soon as its line is complete.
    ///
    /// Cancelling `cancel` kills the child and stops reading; a cancelled
    /// run never reports an error, whatever the exit status.
    pub async fn run<F>(&self, args: &[String], cancel: &CancellationToken, mut on_event: F) -> RunResult
    where
        F: FnMut(ServerMessage) + Send,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        for var in &self.strip_env {
            cmd.env_remove(var);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %self.program.display(), error = %e, "failed to spawn generator");
            RunnerError::Spawn(e.to_string())
        })?;
        let pid = child.id();

        let Some(stdout) = child.stdout.take() else {
            error!(?pid, "generator stdout unavailable");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(RunnerError::StdoutUnavailable);
        };

        info!(?pid, "generator process started");

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(drain_stderr(stderr)));

        let read_result = read_stdout(stdout, cancel, &mut on_event).await;
        if read_result.is_err() && !cancel.is_cancelled() {
            // We can no longer consume its output; don't leave it running.
            let _ = child.start_kill();
        }

        let status = wait_for_exit(&mut child, cancel).await;

        let stderr_text = collect_stderr(stderr_task, cancel.is_cancelled()).await;

        let exit_code = status.as_ref().ok().and_then(ExitStatus::code);
        info!(?pid, ?exit_code, cancelled = cancel.is_cancelled(), "generator process exited");

        if cancel.is_cancelled() {
            return Ok(RunSummary {
                pid,
                exit_code,
                cancelled: true,
            });
        }

        if let Err(e) = read_result {
            warn!(?pid, error = %e, "generator stdout read failed");
            return Err(RunnerError::Read(e.to_string()));
        }

        let status = status.map_err(|e| RunnerError::Read(e.to_string()))?;
        if !status.success() {
            let message = exit_message(&status, &stderr_text);
            error!(?pid, ?exit_code, "generator failed:\n{message}");
            return Err(RunnerError::Exit {
                code: exit_code,
                message,
            });
        }

        Ok(RunSummary {
            pid,
            exit_code,
            cancelled: false,
        })
    }
}

/// Read stdout until EOF, cancellation, or an I/O error.
async fn read_stdout<R, F>(mut stdout: R, cancel: &CancellationToken, on_event: &mut F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(ServerMessage),
{
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = stdout.read(&mut chunk) => read?,
        };
        if n == 0 {
            break;
        }
        for line in lines.push(&chunk[..n]) {
            if let Some(msg) = parse_line(&line) {
                on_event(msg);
            }
        }
    }

    if let Some(rest) = lines.finish() {
        if let Some(msg) = parse_line(&rest) {
            on_event(msg);
        }
    }
    Ok(())
}

/// Accumulate stderr, logging each chunk as it arrives.
async fn drain_stderr<R: AsyncRead + Unpin>(mut stderr: R) -> String {
    let mut collected = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]);
                warn!(target: "chatrelay::generator", "{}", text.trim_end());
                collected.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                debug!(error = %e, "generator stderr read ended");
                break;
            }
        }
    }

    String::from_utf8_lossy(&collected).into_owned()
}

async fn collect_stderr(task: Option<JoinHandle<String>>, cancelled: bool) -> String {
    let Some(mut handle) = task else {
        return String::new();
    };
    if !cancelled {
        return handle.await.unwrap_or_default();
    }
    match tokio::time::timeout(CANCEL_STDERR_GRACE, &mut handle).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

/// Wait for the child, killing it if cancellation arrives first.
async fn wait_for_exit(child: &mut Child, cancel: &CancellationToken) -> io::Result<ExitStatus> {
    if cancel.is_cancelled() {
        let _ = child.start_kill();
        return child.wait().await;
    }

    tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

fn exit_message(status: &ExitStatus, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match status.code() {
        Some(code) => format!("Process exited with code {code}"),
        None => format!("Process exited with {status}"),
    }
}
