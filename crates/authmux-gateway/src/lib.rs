//! AuthMux Gateway
//!
//! OAuth process orchestrator for MCP servers:
//! - Builds helper invocations for remote-proxy and direct servers
//! - Wraps them in an OS sandbox when a backend is installed
//! - Spawns and supervises helper processes
//! - Scrapes helper output for authorization URLs and tokens
//! - Enforces one live session per server, with deadlines and deferred cleanup

pub mod oauth;
pub mod process;
pub mod sandbox;

pub use oauth::{
    Admission, BaseInvocation, InvocationBuilder, OAuthOrchestrator, OAuthSession,
    OutputScanner, ScanSignal, ScannerRules, SessionRegistry, SessionSpec, SessionStatus,
};
pub use process::{
    configure_child_process_platform, OutputStream, ProcessEvent, ProcessHandle,
    ProcessSupervisor, SpawnedProcess, SupervisorOptions,
};
pub use sandbox::{
    BinaryLocator, BubblewrapBackend, SandboxAdapter, SandboxBackend, SandboxDecision,
    SeatbeltBackend, WhichLocator,
};
