//! Domain entities, value objects, and events
//!
//! This module contains all domain-level types for AuthMux:
//! - Requests (OAuthRequest, ServerType, DuplicatePolicy)
//! - Value Objects (Invocation, SessionState, SessionOutcome)
//! - Boundary shapes (OAuthResponse, CredentialHandoff)
//! - Domain Events (OAuthEvent)

pub mod config;
mod event;
mod invocation;
mod request;
mod response;
mod server_log;
mod session;
pub mod settings;

pub use config::*;
pub use event::OAuthEvent;
pub use invocation::Invocation;
pub use request::*;
pub use response::*;
pub use server_log::*;
pub use session::*;
pub use settings::{OAuthSettings, SandboxSettings, DEFAULT_CALLBACK_PORT, LINEAR_CALLBACK_PORT};
