//! Helper process supervision
//!
//! One child per session. Stdout and stderr are read by two tasks that feed a
//! single ordered event channel, line by line, while the process runs. A
//! third task owns the `Child`, reports the exit, and always emits
//! [`ProcessEvent::Exited`] last.

mod shell_env;

use std::process::Stdio;
use std::time::Duration;

use authmux_core::{Invocation, OAuthError, OAuthResult, OAuthSettings};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use shell_env::{child_environment, login_shell_path};

const READ_CHUNK: usize = 4096;
/// A "line" longer than this is delivered without waiting for its newline
const MAX_LINE: usize = 16 * 1024;
const EVENT_CAPACITY: usize = 256;
/// How long the exit reporter waits for readers once the child is gone;
/// grandchildren holding the pipes open must not stall the exit event
const READER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A complete line, newline included (the final line may lack one)
    Line { stream: OutputStream, bytes: Vec<u8> },
    /// Trailing bytes with no newline after an idle period
    Partial { stream: OutputStream, bytes: Vec<u8> },
    /// The child exited; `None` when killed by a signal
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessStatus {
    Running,
    Exited(Option<i32>),
}

/// Platform-specific child isolation.
///
/// Unix: the child leads its own process group, so termination reaches the
/// whole helper tree and terminal signals aimed at the host do not.
/// Windows: no console window for console-subsystem helpers.
pub fn configure_child_process_platform(cmd: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub partial_line_flush: Duration,
    pub terminate_grace: Duration,
}

impl From<&OAuthSettings> for SupervisorOptions {
    fn from(settings: &OAuthSettings) -> Self {
        Self {
            partial_line_flush: settings.partial_line_flush(),
            terminate_grace: settings.terminate_grace(),
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&OAuthSettings::default())
    }
}

/// A spawned helper: its handle and its output/exit stream
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub events: mpsc::Receiver<ProcessEvent>,
}

pub struct ProcessSupervisor {
    options: SupervisorOptions,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self { options }
    }

    /// Resolve the login-shell `PATH` on the blocking pool. The first lookup
    /// starts an interactive shell; later calls return the cached value.
    pub async fn prepare_environment(&self) {
        if let Err(e) = tokio::task::spawn_blocking(login_shell_path).await {
            warn!("[Process] Login PATH lookup did not finish: {}", e);
        }
    }

    pub fn spawn(&self, invocation: &Invocation) -> OAuthResult<SpawnedProcess> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .env_clear()
            .envs(child_environment(&invocation.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_child_process_platform(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| OAuthError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        let pid = child.id();
        info!(pid = ?pid, program = %invocation.program, "[Process] Spawned helper");

        let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ProcessStatus::Running);
        let kill = CancellationToken::new();

        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_output(
                stdout,
                OutputStream::Stdout,
                events_tx.clone(),
                self.options.partial_line_flush,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_output(
                stderr,
                OutputStream::Stderr,
                events_tx.clone(),
                self.options.partial_line_flush,
            )));
        }

        let kill_requested = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_requested.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        debug!(pid = ?pid, "[Process] start_kill: {}", e);
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid = ?pid, "[Process] Failed to reap helper: {}", e);
                    None
                }
            };
            debug!(pid = ?pid, code = ?code, "[Process] Helper exited");
            let _ = status_tx.send(ProcessStatus::Exited(code));

            for mut reader in readers {
                if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
                    reader.abort();
                }
            }
            let _ = events_tx.send(ProcessEvent::Exited { code }).await;
        });

        Ok(SpawnedProcess {
            handle: ProcessHandle {
                pid,
                kill,
                status: status_rx,
                grace: self.options.terminate_grace,
            },
            events,
        })
    }
}

/// Owned by exactly one session; not cloneable.
pub struct ProcessHandle {
    pid: Option<u32>,
    kill: CancellationToken,
    status: watch::Receiver<ProcessStatus>,
    grace: Duration,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.borrow(), ProcessStatus::Running)
    }

    /// Wait for exit and return the exit code (`None` for signal deaths)
    pub async fn wait(&self) -> Option<i32> {
        let mut status = self.status.clone();
        loop {
            if let ProcessStatus::Exited(code) = *status.borrow_and_update() {
                return code;
            }
            if status.changed().await.is_err() {
                return None;
            }
        }
    }

    /// SIGTERM, then SIGKILL after the grace window. No-op once exited.
    ///
    /// Returns `true` if a signal had to be sent.
    pub async fn terminate(&self) -> bool {
        if !self.is_running() {
            return false;
        }

        debug!(pid = ?self.pid, "[Process] Terminating helper");
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);
        #[cfg(not(unix))]
        self.kill.cancel();

        if tokio::time::timeout(self.grace, self.wait()).await.is_ok() {
            return true;
        }

        warn!(
            pid = ?self.pid,
            grace_ms = self.grace.as_millis() as u64,
            "[Process] Helper ignored SIGTERM, killing"
        );
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
        self.kill.cancel();
        if tokio::time::timeout(self.grace, self.wait()).await.is_err() {
            warn!(pid = ?self.pid, "[Process] Helper still not reaped after kill");
        }
        true
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) {
        let Some(pid) = self.pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
            self.kill.cancel();
            return;
        };
        // SAFETY: negative pid targets the process group created at spawn
        let rc = unsafe { libc::kill(-pid, signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                debug!(pid, signal, "[Process] kill failed: {}", err);
            }
        }
    }
}

async fn pump_output<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<ProcessEvent>,
    flush_after: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = if pending.is_empty() {
            reader.read(&mut chunk).await
        } else {
            match tokio::time::timeout(flush_after, reader.read(&mut chunk)).await {
                Ok(read) => read,
                Err(_) => {
                    let bytes = std::mem::take(&mut pending);
                    if tx.send(ProcessEvent::Partial { stream, bytes }).await.is_err() {
                        return;
                    }
                    continue;
                }
            }
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let bytes: Vec<u8> = pending.drain(..=pos).collect();
                    if tx.send(ProcessEvent::Line { stream, bytes }).await.is_err() {
                        return;
                    }
                }
                if pending.len() >= MAX_LINE {
                    let bytes = std::mem::take(&mut pending);
                    if tx.send(ProcessEvent::Line { stream, bytes }).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!(?stream, "[Process] Read error: {}", e);
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(ProcessEvent::Line { stream, bytes: pending }).await;
    }
}
