//! Outbound response shape and credential hand-off

use serde::{Deserialize, Serialize};

use super::SessionOutcome;

/// Response returned to the web-request layer
///
/// A present `oauth_url` means the caller must redirect the end user there.
/// A present `token` means the caller should persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OAuthResponse {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            success: true,
            oauth_url: Some(url.into()),
            token: None,
            error: None,
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            success: true,
            oauth_url: None,
            token: Some(token.into()),
            error: None,
        }
    }

    /// Success without a token (credential managed by the helper)
    pub fn completed() -> Self {
        Self {
            success: true,
            oauth_url: None,
            token: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            oauth_url: None,
            token: None,
            error: Some(message.into()),
        }
    }

    /// Map a session outcome to the caller-facing response.
    ///
    /// `Error` outcomes carry operator detail, so callers pass the user-facing
    /// text separately.
    pub fn from_outcome(outcome: &SessionOutcome, user_error: &str) -> Self {
        match outcome {
            SessionOutcome::AuthorizationUrl(url) => Self::url(url.clone()),
            SessionOutcome::Token(token) => Self::token(token.clone()),
            SessionOutcome::CompletedWithoutToken => Self::completed(),
            SessionOutcome::Error(_) => Self::error(user_error),
        }
    }
}

/// Token hand-off to the external credential-storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHandoff {
    pub server_id: String,
    pub token: String,
    /// Provider host or name, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
}
