//! Collaborator traits
//!
//! These traits define what the orchestrator hands off to the host without
//! specifying where or how it is stored.

use async_trait::async_trait;

use crate::domain::CredentialHandoff;

/// Result type for collaborator operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Credential-storage collaborator.
///
/// Receives a token once a session completes with one. Storage, encryption
/// and provider bookkeeping are entirely the implementor's concern.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn store(&self, handoff: CredentialHandoff) -> RepoResult<()>;
}
