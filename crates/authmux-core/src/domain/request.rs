//! Inbound OAuth bootstrap request

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a server obtains its OAuth authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Reached through a generic remote-MCP bridge tool (e.g. `mcp-remote`)
    /// that performs the browser flow against a remote endpoint
    RemoteProxy,
    /// The server binary speaks OAuth itself over an HTTP-based transport and
    /// accepts an explicit auth flag
    Direct,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteProxy => "remote_proxy",
            Self::Direct => "direct",
        }
    }
}

/// What to do when a request collides with a live session for the same server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Wait on the live session and return its signal (idempotent re-check)
    #[default]
    Reattach,
    /// Fail immediately with `AlreadyInProgress`
    Reject,
}

/// Request to bootstrap OAuth for one MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthRequest {
    /// Opaque stable server identifier
    pub server_id: String,
    /// Human-readable label (logs/UI only)
    pub server_name: String,
    /// Remote endpoint for servers that expose OAuth over HTTP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// Explicit strategy; detected from the command line when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<ServerType>,
    pub base_command: String,
    #[serde(default)]
    pub base_args: Vec<String>,
    #[serde(default)]
    pub base_env: HashMap<String, String>,
    /// Forced on for OAuth helpers regardless of the server's own preference
    #[serde(default = "default_true")]
    pub sandboxing_requested: bool,
    /// Collision behaviour; the orchestrator's configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_policy: Option<DuplicatePolicy>,
}

fn default_true() -> bool {
    true
}

impl OAuthRequest {
    pub fn new(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        base_command: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            server_name: server_name.into(),
            server_url: None,
            server_type: None,
            base_command: base_command.into(),
            base_args: Vec::new(),
            base_env: HashMap::new(),
            sandboxing_requested: true,
            duplicate_policy: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.base_env = env;
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = Some(server_type);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = Some(policy);
        self
    }
}
