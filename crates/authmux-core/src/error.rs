//! Error taxonomy for the OAuth process orchestrator
//!
//! Missing sandbox backends are not represented here: they degrade to an
//! unsandboxed run and are only logged.

use thiserror::Error;

/// Failures while translating a server description into an invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("no http(s) URL found in the bridge arguments")]
    NoRemoteUrlFound,
    #[error("unsupported server type: {0}")]
    UnsupportedServerType(String),
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit (or clean exit without a completion signal)
    #[error("helper exited with {} before completing authorization; output tail:\n{tail}", describe_code(.code))]
    ProcessExit { code: Option<i32>, tail: String },

    #[error("OAuth session timed out")]
    Timeout,

    #[error("OAuth already in progress for server '{server_id}'")]
    AlreadyInProgress { server_id: String },

    #[error("OAuth session cancelled")]
    Cancelled,

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "a signal".to_string(),
    }
}

pub type OAuthResult<T> = Result<T, OAuthError>;

impl OAuthError {
    /// A fresh attempt may succeed (the user was slow, or another attempt is
    /// still running)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::AlreadyInProgress { .. })
    }

    /// Text safe to show the end user. Raw helper output never appears here.
    pub fn user_message(&self) -> String {
        match self {
            Self::Builder(BuilderError::NoRemoteUrlFound) => {
                "This server's configuration has no remote URL to authorize against".to_string()
            }
            Self::Builder(BuilderError::UnsupportedServerType(_)) => {
                "This server does not support browser-based authorization".to_string()
            }
            Self::Spawn { .. } => {
                "Could not start the authentication helper. Check that it is installed".to_string()
            }
            Self::ProcessExit { .. } | Self::Internal(_) => {
                "Authentication failed. Please try again".to_string()
            }
            Self::Timeout => "Authentication timed out. Please try again".to_string(),
            Self::AlreadyInProgress { .. } => {
                "Authentication is already in progress. Complete it in your browser or try again shortly".to_string()
            }
            Self::Cancelled => "Authentication was cancelled".to_string(),
        }
    }
}
