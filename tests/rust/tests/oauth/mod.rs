//! OAuth orchestration integration tests
//!
//! Real helper processes (shell scripts) driven through `OAuthOrchestrator`.

#![cfg(unix)]

mod flow;
mod lifecycle;
