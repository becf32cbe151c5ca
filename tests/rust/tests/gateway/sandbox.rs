//! SandboxAdapter tests with injected binary lookup

use std::sync::Arc;

use authmux_core::{Invocation, SandboxSettings};
use authmux_gateway::{BubblewrapBackend, SandboxAdapter, SeatbeltBackend};
use pretty_assertions::assert_eq;
use tests::locators::FakeLocator;

fn invocation() -> Invocation {
    Invocation::new("npx").with_args(["-y", "mcp-remote", "https://mcp.example.com/sse", "3334"])
}

fn adapter(programs: &[&str], settings: &SandboxSettings) -> SandboxAdapter {
    SandboxAdapter::with_locator(settings, Arc::new(FakeLocator::with(programs)))
}

#[test]
fn test_no_backend_available_returns_invocation_unchanged() {
    let adapter = adapter(&[], &SandboxSettings::default());

    assert!(adapter.try_wrap(&invocation(), true).is_none());
    let decision = adapter.apply(&invocation(), true);
    assert!(!decision.is_sandboxed());
    assert_eq!(decision.invocation, invocation());
}

#[test]
fn test_not_requested_is_never_wrapped() {
    let adapter = adapter(&["bwrap", "sandbox-exec"], &SandboxSettings::default());
    assert!(adapter.try_wrap(&invocation(), false).is_none());
}

#[test]
fn test_bubblewrap_wraps_whole_command() {
    let adapter = adapter(&["bwrap"], &SandboxSettings::default());
    let decision = adapter.try_wrap(&invocation(), true).unwrap();

    assert_eq!(decision.backend, Some(BubblewrapBackend::NAME));
    assert_eq!(decision.invocation.program, "/usr/bin/bwrap");

    let args = &decision.invocation.args;
    let sep = args.iter().position(|a| a == "--").unwrap();
    assert_eq!(
        args[sep + 1..].to_vec(),
        vec!["npx", "-y", "mcp-remote", "https://mcp.example.com/sse", "3334"]
    );
    assert!(args[..sep].iter().any(|a| a == "--die-with-parent"));
    assert_eq!(decision.invocation.env, invocation().env);
}

#[test]
fn test_falls_back_to_second_backend() {
    let adapter = adapter(&["sandbox-exec"], &SandboxSettings::default());
    let decision = adapter.try_wrap(&invocation(), true).unwrap();

    assert_eq!(decision.backend, Some(SeatbeltBackend::NAME));
    assert_eq!(decision.invocation.program, "/usr/bin/sandbox-exec");
    assert_eq!(
        decision.invocation.args[2..].to_vec(),
        vec!["npx", "-y", "mcp-remote", "https://mcp.example.com/sse", "3334"]
    );
}

#[test]
fn test_backend_order_follows_settings() {
    let settings = SandboxSettings {
        backends: vec!["seatbelt".into(), "bubblewrap".into()],
        ..SandboxSettings::default()
    };
    let adapter = adapter(&["bwrap", "sandbox-exec"], &settings);
    assert_eq!(adapter.backend_names(), vec!["seatbelt", "bubblewrap"]);

    let decision = adapter.apply(&invocation(), true);
    assert_eq!(decision.backend, Some(SeatbeltBackend::NAME));
    assert_eq!(decision.invocation.args[0], "-p");
    assert_eq!(decision.invocation.args[2], "npx");
}

#[test]
fn test_allow_list_disables_backend() {
    let settings = SandboxSettings {
        backends: vec!["seatbelt".into()],
        ..SandboxSettings::default()
    };
    // bwrap is installed but not allowed
    let adapter = adapter(&["bwrap"], &settings);
    assert!(adapter.try_wrap(&invocation(), true).is_none());
}
