//! Domain Events - session lifecycle notifications
//!
//! Emitted by the session registry and orchestrator, consumed by host UIs and
//! audit logging. Events are facts; they never carry raw helper output or
//! tokens.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OAuthEvent {
    /// A session moved to a new state
    SessionStateChanged {
        server_id: String,
        session_id: Uuid,
        state: SessionState,
        /// Short operator-facing note ("authorization URL issued", exit code, ...)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// No sandbox backend was available; the helper runs unconfined
    SandboxUnavailable {
        server_id: String,
        session_id: Uuid,
    },
    /// A session was removed from the registry after deferred cleanup
    SessionRemoved {
        server_id: String,
        session_id: Uuid,
    },
}

impl OAuthEvent {
    pub fn server_id(&self) -> &str {
        match self {
            Self::SessionStateChanged { server_id, .. }
            | Self::SandboxUnavailable { server_id, .. }
            | Self::SessionRemoved { server_id, .. } => server_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session_state_changed",
            Self::SandboxUnavailable { .. } => "sandbox_unavailable",
            Self::SessionRemoved { .. } => "session_removed",
        }
    }
}
