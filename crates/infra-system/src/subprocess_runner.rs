// Subprocess runner implementation
// reason: tokio for async process management, nix for process-group signals
use async_trait::async_trait;
use futures::future::join_all;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use isoenv_core::application::constants::{DEFAULT_KILL_GRACE, DEFAULT_OUTPUT_CAP_BYTES};
use isoenv_core::port::{
    CapturedStream, ProcessInvocation, ProcessOutcome, ProcessOutput, ProcessRunner, RunError,
};

/// Read size for the output pumps
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long to wait for output pipes to close once the child is gone
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte buffer that keeps the first `cap` bytes and counts the rest as dropped
struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_captured(self) -> CapturedStream {
        CapturedStream {
            text: String::from_utf8_lossy(&self.data).into_owned(),
            truncated: self.truncated,
        }
    }
}

/// Subprocess runner
///
/// Each child is its own process-group leader so a timeout can take down the
/// whole tree. Output is pumped into capped buffers; anything past the cap is
/// drained and dropped so the child never blocks on a full pipe.
pub struct SubprocessRunner {
    output_cap_bytes: usize,
    kill_grace: Duration,
}

impl Default for SubprocessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAP_BYTES, DEFAULT_KILL_GRACE)
    }
}

impl SubprocessRunner {
    /// Create a new subprocess runner
    ///
    /// # Arguments
    /// * `output_cap_bytes` - Per-stream capture limit
    /// * `kill_grace` - Time between SIGTERM and SIGKILL on timeout
    pub fn new(output_cap_bytes: usize, kill_grace: Duration) -> Self {
        Self {
            output_cap_bytes,
            kill_grace,
        }
    }

    fn build_command(invocation: &ProcessInvocation) -> Command {
        let mut std_command = std::process::Command::new(&invocation.program);
        std_command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !invocation.inherit_parent_env {
            std_command.env_clear();
        }
        std_command.envs(&invocation.env);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        let mut command = Command::from(std_command);
        command.kill_on_drop(true);
        command
    }

    fn spawn_reader<R>(stream: Option<R>, buffer: Arc<Mutex<CappedBuffer>>) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut stream = stream?;
        Some(tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK_BYTES];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => buffer.lock().await.push(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "Output pump stopped");
                        break;
                    }
                }
            }
        }))
    }

    /// Join the output pumps under one shared deadline
    ///
    /// Pumps still blocked on a pipe held open by an escaped process are aborted.
    async fn drain(readers: Vec<JoinHandle<()>>) {
        let aborts: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();
        if timeout(READER_DRAIN_TIMEOUT, join_all(readers)).await.is_err() {
            warn!("Output pipe still open after child exit, abandoning readers");
            for handle in aborts {
                handle.abort();
            }
        }
    }

    async fn take(buffer: &Arc<Mutex<CappedBuffer>>) -> CapturedStream {
        let mut guard = buffer.lock().await;
        std::mem::replace(&mut *guard, CappedBuffer::new(0)).into_captured()
    }

    /// Signal the child's process group
    ///
    /// `Child::id` is `None` once tokio has reaped the leader; past that point
    /// the group id may belong to someone else, so nothing is sent.
    #[cfg(unix)]
    fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> bool {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return false;
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) => true,
            Err(e) => {
                debug!(pid = pid, signal = ?signal, error = %e, "Group signal failed");
                false
            }
        }
    }

    /// Kill process group with SIGTERM first, then SIGKILL after the grace period
    async fn terminate(&self, child: &mut Child) {
        let pid = child.id();

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            // Step 1: SIGTERM to the whole group
            info!(pid = ?pid, "Sending SIGTERM to process group");
            if Self::signal_group(child, Signal::SIGTERM) {
                // Step 2: wait for the leader within the grace period (not reaped)
                if timeout(self.kill_grace, leader_exit(child)).await.is_err() {
                    warn!(pid = ?pid, "Process did not exit after SIGTERM, sending SIGKILL");
                }

                // Step 3: SIGKILL sweeps the leader and any descendants left behind
                Self::signal_group(child, Signal::SIGKILL);
                if let Err(e) = child.wait().await {
                    warn!(pid = ?pid, error = %e, "Failed to reap child after kill");
                }
                return;
            }
        }

        if let Err(e) = child.start_kill() {
            debug!(pid = ?pid, error = %e, "Kill failed");
        }
        if let Err(e) = child.wait().await {
            warn!(pid = ?pid, error = %e, "Failed to reap child after kill");
        }
    }

    fn classify(status: ExitStatus) -> ProcessOutcome {
        match status.code() {
            Some(code) => ProcessOutcome::Exited(code),
            None => ProcessOutcome::Signalled(signal_of(status)),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> Option<i32> {
    None
}

/// Wait for the group leader to exit, leaving it unreaped
///
/// The zombie keeps its pid (and with it the group id) reserved until
/// `Child::wait` collects it, so the group can still be swept safely.
#[cfg(target_os = "linux")]
async fn leader_exit(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return child.wait().await.map(|_| ());
    };

    let watcher = tokio::task::spawn_blocking(move || {
        use nix::errno::Errno;
        use nix::sys::wait::{waitid, Id, WaitPidFlag};
        use nix::unistd::Pid;

        loop {
            match waitid(
                Id::Pid(Pid::from_raw(pid as i32)),
                WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
            ) {
                Err(Errno::EINTR) => continue,
                other => return other.map(|_| ()),
            }
        }
    });

    match watcher.await {
        Ok(result) => result.map_err(std::io::Error::from),
        Err(e) => Err(std::io::Error::other(e)),
    }
}

/// Elsewhere the leader is reaped on exit and the group is left alone
#[cfg(not(target_os = "linux"))]
async fn leader_exit(child: &mut Child) -> std::io::Result<()> {
    child.wait().await.map(|_| ())
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(&self, invocation: ProcessInvocation) -> Result<ProcessOutput, RunError> {
        let started = Instant::now();

        let mut child = Self::build_command(&invocation).spawn().map_err(|e| {
            RunError::SpawnFailed(format!("{}: {}", invocation.program.display(), e))
        })?;
        let pid = child.id();

        info!(
            program = %invocation.program.display(),
            pid = ?pid,
            timeout_ms = invocation.timeout.as_millis() as u64,
            "Starting subprocess execution"
        );

        let stdout_buf = Arc::new(Mutex::new(CappedBuffer::new(self.output_cap_bytes)));
        let stderr_buf = Arc::new(Mutex::new(CappedBuffer::new(self.output_cap_bytes)));
        let readers: Vec<JoinHandle<()>> = [
            Self::spawn_reader(child.stdout.take(), stdout_buf.clone()),
            Self::spawn_reader(child.stderr.take(), stderr_buf.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let outcome = match timeout(invocation.timeout, leader_exit(&mut child)).await {
            Ok(Ok(())) => {
                // Descendants that outlive the leader go down with it
                #[cfg(unix)]
                {
                    if Self::signal_group(&child, nix::sys::signal::Signal::SIGKILL) {
                        debug!(pid = ?pid, "Swept process group after leader exit");
                    }
                }
                match child.wait().await {
                    Ok(status) => Self::classify(status),
                    Err(e) => {
                        Self::drain(readers).await;
                        return Err(RunError::IoError(e.to_string()));
                    }
                }
            }
            Ok(Err(e)) => {
                self.terminate(&mut child).await;
                Self::drain(readers).await;
                return Err(RunError::IoError(e.to_string()));
            }
            Err(_) => {
                warn!(
                    pid = ?pid,
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Subprocess exceeded its deadline"
                );
                self.terminate(&mut child).await;
                ProcessOutcome::TimedOut
            }
        };

        Self::drain(readers).await;
        let stdout = Self::take(&stdout_buf).await;
        let stderr = Self::take(&stderr_buf).await;

        info!(
            pid = ?pid,
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = ?outcome,
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "Subprocess execution completed"
        );

        Ok(ProcessOutput {
            outcome,
            stdout,
            stderr,
            pid,
        })
    }
}
