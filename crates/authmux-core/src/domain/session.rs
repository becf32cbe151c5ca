//! OAuth session lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServerType;

/// OAuth session state
///
/// ```text
/// Pending -> Running -> UrlIssued -> Completed | Failed | TimedOut | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, process not yet spawned
    #[default]
    Pending,
    /// Helper process running, no signal yet
    Running,
    /// Authorization URL handed out; helper still running in the background
    UrlIssued,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the session state machine.
    ///
    /// `Pending -> Failed` covers spawn failures; `UrlIssued -> Completed |
    /// Failed` covers the helper finishing the redirect flow after the URL
    /// was returned.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, UrlIssued)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Cancelled)
                | (UrlIssued, Completed)
                | (UrlIssued, Failed)
                | (UrlIssued, TimedOut)
                | (UrlIssued, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::UrlIssued => "url_issued",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result carried by a session once it produced a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The end user must be redirected here
    AuthorizationUrl(String),
    /// Token emitted by the helper; handed to the credential sink
    Token(String),
    /// Helper signalled success without exposing a token; the credential is
    /// managed by the helper/provider
    CompletedWithoutToken,
    /// Failure description (operator-facing)
    Error(String),
}

/// Read-only view of a session, safe to hand to callers and UIs.
///
/// Never carries raw helper output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub server_id: String,
    pub server_name: String,
    pub server_type: ServerType,
    pub state: SessionState,
    pub callback_port: Option<u16>,
    /// Sandbox backend in use, `None` when running unsandboxed
    pub sandbox: Option<String>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub outcome: Option<SessionOutcome>,
    /// Bytes of helper output captured so far
    pub output_len: usize,
}
