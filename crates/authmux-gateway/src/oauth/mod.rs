//! OAuth bootstrap for MCP servers
//!
//! The orchestrator turns an [`OAuthRequest`](authmux_core::OAuthRequest)
//! into a sandboxed helper process, watches its output for an authorization
//! URL or token and tracks the session until it is terminal.

mod invocation;
mod orchestrator;
pub mod registry;
mod scanner;
pub mod session;

pub use invocation::{BaseInvocation, InvocationBuilder};
pub use orchestrator::OAuthOrchestrator;
pub use registry::{Admission, SessionRegistry};
pub use scanner::{OutputScanner, ScanSignal, ScannerRules};
pub use session::{OAuthSession, SessionSpec, SessionStatus};
