//! # AuthMux Core Library
//!
//! Domain types and contracts shared by the OAuth process orchestrator.
//!
//! ## Modules
//!
//! - `branding` - Product naming and well-known paths
//! - `domain` - Requests, invocations, session states, responses, events
//! - `error` - Builder and orchestration error taxonomy
//! - `repository` - Collaborator traits (credential hand-off)
//! - `service` - Per-server operator log files
//! - `event_bus` - Broadcast distribution of session events

pub mod branding;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use domain::*;
pub use error::{BuilderError, OAuthError, OAuthResult};
pub use repository::*;
pub use service::*;

pub use event_bus::{EventBus, EventReceiver, EventSender};
