//! A single OAuth session
//!
//! State and outcome live in one `watch` channel, so transitions are atomic
//! and observable without locks. The process handle and output buffer are
//! owned by the session and touched only by its drive task and by cleanup.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use authmux_core::{
    Invocation, ServerType, SessionOutcome, SessionSnapshot, SessionState,
};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::process::ProcessHandle;

/// Lines kept for failure diagnostics
const TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub outcome: Option<SessionOutcome>,
}

impl SessionStatus {
    /// Whether a waiting caller has something to return
    pub fn is_settled(&self) -> bool {
        self.outcome.is_some() || self.state.is_terminal()
    }
}

/// Everything needed to register a session
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub server_id: String,
    pub server_name: String,
    pub server_type: ServerType,
    pub invocation: Invocation,
    pub callback_port: Option<u16>,
    pub sandbox: Option<&'static str>,
    pub remote_url: Option<String>,
    pub lifetime: Duration,
}

/// Captured helper output. Append-only, bounded, frozen once the session is
/// terminal.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    content: Vec<u8>,
    limit: usize,
    dropped: usize,
    frozen: bool,
    recent: VecDeque<String>,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Returns the number of bytes stored
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if self.frozen {
            return 0;
        }
        let room = self.limit.saturating_sub(self.content.len());
        let kept = room.min(bytes.len());
        self.content.extend_from_slice(&bytes[..kept]);
        self.dropped += bytes.len() - kept;

        let line = String::from_utf8_lossy(bytes).trim_end().to_string();
        if !line.is_empty() {
            if self.recent.len() == TAIL_LINES {
                self.recent.pop_front();
            }
            self.recent.push_back(line);
        }
        kept
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Last lines seen, even past the size limit
    pub fn tail(&self) -> String {
        self.recent.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn release(&mut self) {
        self.content = Vec::new();
        self.recent.clear();
        self.frozen = true;
    }
}

pub struct OAuthSession {
    id: Uuid,
    server_id: String,
    server_name: String,
    server_type: ServerType,
    invocation: Invocation,
    callback_port: Option<u16>,
    sandbox: Option<&'static str>,
    remote_url: Option<String>,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    lifetime: Duration,

    status: watch::Sender<SessionStatus>,
    output: Mutex<OutputBuffer>,
    output_len: AtomicUsize,
    process: Mutex<Option<ProcessHandle>>,
    pid: OnceLock<u32>,
    cancel: CancellationToken,
}

impl OAuthSession {
    pub fn new(spec: SessionSpec, output_limit: usize) -> Self {
        let started_at = Utc::now();
        let deadline = started_at
            + chrono::Duration::from_std(spec.lifetime).unwrap_or_else(|_| chrono::Duration::zero());
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Pending,
            outcome: None,
        });

        Self {
            id: Uuid::new_v4(),
            server_id: spec.server_id,
            server_name: spec.server_name,
            server_type: spec.server_type,
            invocation: spec.invocation,
            callback_port: spec.callback_port,
            sandbox: spec.sandbox,
            remote_url: spec.remote_url,
            started_at,
            deadline,
            lifetime: spec.lifetime,
            status,
            output: Mutex::new(OutputBuffer::new(output_limit)),
            output_len: AtomicUsize::new(0),
            process: Mutex::new(None),
            pid: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn callback_port(&self) -> Option<u16> {
        self.callback_port
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Apply `next` if it is an edge of the state machine. Atomic with
    /// respect to every other transition on this session.
    pub(crate) fn apply_transition(
        &self,
        next: SessionState,
        outcome: Option<SessionOutcome>,
    ) -> Result<SessionState, SessionState> {
        let mut previous = self.state();
        let applied = self.status.send_if_modified(|status| {
            previous = status.state;
            if !status.state.can_transition_to(next) {
                return false;
            }
            status.state = next;
            if outcome.is_some() {
                status.outcome = outcome.clone();
            }
            true
        });
        if applied {
            Ok(previous)
        } else {
            Err(previous)
        }
    }

    /// Store the helper's handle. A session cancelled before this point gets
    /// the handle back so the caller can terminate it.
    pub(crate) async fn attach_process(&self, handle: ProcessHandle) -> Result<(), ProcessHandle> {
        let mut slot = self.process.lock().await;
        if self.cancel.is_cancelled() {
            return Err(handle);
        }
        if let Some(pid) = handle.pid() {
            let _ = self.pid.set(pid);
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Terminate the helper. The handle is released on first call, so any
    /// later call is a no-op returning `false`.
    pub async fn terminate(&self) -> bool {
        let handle = self.process.lock().await.take();
        match handle {
            Some(handle) => {
                handle.terminate().await;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn append_output(&self, bytes: &[u8]) {
        let mut output = self.output.lock().await;
        if self.state().is_terminal() {
            output.freeze();
            return;
        }
        let stored = output.append(bytes);
        self.output_len.fetch_add(stored, Ordering::Relaxed);
    }

    pub(crate) async fn freeze_output(&self) {
        self.output.lock().await.freeze();
    }

    pub(crate) async fn output_tail(&self) -> String {
        self.output.lock().await.tail()
    }

    pub(crate) async fn release_output(&self) {
        self.output.lock().await.release();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.status();
        SessionSnapshot {
            session_id: self.id,
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            server_type: self.server_type,
            state: status.state,
            callback_port: self.callback_port,
            sandbox: self.sandbox.map(String::from),
            pid: self.pid(),
            started_at: self.started_at,
            deadline: self.deadline,
            outcome: status.outcome,
            output_len: self.output_len.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for OAuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSession")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}
