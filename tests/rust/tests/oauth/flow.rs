//! Request → helper → response flows

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use authmux_core::{
    LogConfig, LogSource, OAuthError, SandboxSettings, ServerLogManager, SessionOutcome,
};
use pretty_assertions::assert_eq;
use tests::async_helpers::{with_timeout, DEFAULT_TIMEOUT};
use tests::fixtures::{bridge_request, direct_request, fast_settings, unsandboxed};
use tests::locators::FakeLocator;
use tests::scripts::{pid_alive, ScriptDir};
use tests::sinks::RecordingCredentialSink;
use tests::*;

/// Script that prints `line`, then stays up like a bridge waiting for the
/// browser redirect
fn long_running(dir: &ScriptDir, line: &str) -> String {
    dir.script(
        "proxy-tool",
        &format!(
            "echo \"$@\" > '{}'\necho '{}'\nexec sleep 30",
            dir.file("args").display(),
            line
        ),
    )
}

#[tokio::test]
async fn test_linear_bridge_end_to_end() {
    init_test_tracing();
    let dir = ScriptDir::new();
    let program = long_running(&dir, "Opening browser to https://linear.app/oauth/authorize?client=abc");

    // No sandbox backend installed
    let orchestrator = OAuthOrchestrator::new(fast_settings())
        .unwrap()
        .with_sandbox(SandboxAdapter::with_locator(
            &SandboxSettings::default(),
            Arc::new(FakeLocator::empty()),
        ));
    let mut events = orchestrator.subscribe();

    let request = OAuthRequest::new("srv-1", "Linear", program)
        .with_args(["-y", "proxy-tool", "https://mcp.linear.app/sse"]);
    let response = with_timeout(DEFAULT_TIMEOUT, orchestrator.start_oauth(request)).await;

    assert_eq!(
        response,
        OAuthResponse::url("https://linear.app/oauth/authorize?client=abc")
    );

    let snapshot = orchestrator.status("srv-1").unwrap();
    assert_eq!(snapshot.state, SessionState::UrlIssued);
    assert_eq!(snapshot.callback_port, Some(8080));
    assert_eq!(snapshot.sandbox, None);
    assert!(pid_alive(snapshot.pid.unwrap()), "helper must keep running after the URL");
    assert_eq!(dir.read("args").trim(), "-y proxy-tool https://mcp.linear.app/sse 8080");

    let unavailable = tests::events::wait_for_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, OAuthEvent::SandboxUnavailable { .. })
    })
    .await;
    assert!(unavailable.is_some());

    orchestrator.shutdown().await;
    assert!(orchestrator.status("srv-1").is_none());
}

#[tokio::test]
async fn test_url_split_across_writes_is_found_whole() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "printf 'Please visit https://auth.exa'\nsleep 0.05\nprintf 'mple.com/authorize?state=xyz&scope=read to continue\\n'\nexec sleep 30",
    );
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(bridge_request("split", &program)).await;
    assert_eq!(
        response.oauth_url.as_deref(),
        Some("https://auth.example.com/authorize?state=xyz&scope=read")
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_pause_mid_url_longer_than_flush_keeps_url_whole() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "printf 'Please visit https://auth.exa'\nsleep 0.5\nprintf 'mple.com/authorize?state=xyz\\n'\nexec sleep 30",
    );
    let settings = fast_settings();
    assert!(settings.partial_line_flush_ms < 500 && settings.output_settle_ms > 500);
    let orchestrator = unsandboxed(settings);

    let response = orchestrator.start_oauth(bridge_request("paused", &program)).await;
    assert_eq!(
        response.oauth_url.as_deref(),
        Some("https://auth.example.com/authorize?state=xyz")
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unterminated_url_accepted_once_output_settles() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "printf 'Open https://auth.example.com/authorize?q=1'\nexec sleep 30",
    );
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(bridge_request("no-newline", &program)).await;
    assert_eq!(
        response.oauth_url.as_deref(),
        Some("https://auth.example.com/authorize?q=1")
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_url_issued_then_completed_by_marker() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "echo 'Visit https://auth.example.com/authorize?s=2'\nsleep 1\necho 'Authentication successful'\nexec sleep 30",
    );
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(bridge_request("later", &program)).await;
    assert_eq!(response, OAuthResponse::url("https://auth.example.com/authorize?s=2"));
    assert_eq!(orchestrator.status("later").unwrap().state, SessionState::UrlIssued);

    let snapshot = orchestrator
        .wait_for_completion("later", Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.outcome, Some(SessionOutcome::CompletedWithoutToken));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_url_issued_then_completed_by_token() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "echo 'Visit https://auth.example.com/authorize?s=3'\nsleep 1\necho 'access_token=tok-9c8b7a6d5e4f'\nexec sleep 30",
    );
    let sink = Arc::new(RecordingCredentialSink::new());
    let orchestrator = unsandboxed(fast_settings()).with_credential_sink(sink.clone());

    let response = orchestrator.start_oauth(bridge_request("later-tok", &program)).await;
    assert_eq!(response, OAuthResponse::url("https://auth.example.com/authorize?s=3"));

    let snapshot = orchestrator
        .wait_for_completion("later-tok", Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.outcome, Some(SessionOutcome::Token("tok-9c8b7a6d5e4f".into())));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.stored().len(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_token_is_returned_and_handed_off() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "echo 'npm WARN deprecated foo@1.0.0'\necho 'access_token=tok-4f9a8b7c6d5e'\nexec sleep 30",
    );
    let logs = tempfile::TempDir::new().unwrap();
    let log_manager = Arc::new(ServerLogManager::new(LogConfig {
        base_dir: logs.path().to_path_buf(),
        ..LogConfig::default()
    }));
    let sink = Arc::new(RecordingCredentialSink::new());
    let orchestrator = unsandboxed(fast_settings())
        .with_log_manager(log_manager.clone())
        .with_credential_sink(sink.clone());

    let response = orchestrator.start_oauth(bridge_request("tok", &program)).await;
    assert_eq!(response, OAuthResponse::token("tok-4f9a8b7c6d5e"));

    let snapshot = orchestrator
        .wait_for_completion("tok", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);

    // Hand-off runs on the drive task right after the transition
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = sink.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].server_id, "tok");
    assert_eq!(stored[0].token, "tok-4f9a8b7c6d5e");
    assert_eq!(stored[0].provider_hint.as_deref(), Some("mcp.example.com"));

    let entries = log_manager.read_logs("tok", 100, None).await.unwrap();
    let stdout: Vec<&str> = entries
        .iter()
        .filter(|l| l.source == LogSource::Stdout)
        .map(|l| l.message.as_str())
        .collect();
    assert!(stdout.contains(&"npm WARN deprecated foo@1.0.0"));
    assert!(stdout.contains(&"access_token=[REDACTED]"));
    assert!(entries.iter().all(|l| !l.message.contains("tok-4f9a8b7c6d5e")));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_completion_marker_without_token() {
    let dir = ScriptDir::new();
    let program = dir.script("mcp-remote", "echo 'Proxy established successfully'\nexec sleep 30");
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(bridge_request("marker", &program)).await;
    assert_eq!(response, OAuthResponse::completed());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_direct_server_clean_exit_completes() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "server-bin",
        &format!("echo \"$@\" > '{}'\necho 'token cached'\nexit 0", dir.file("args").display()),
    );
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(direct_request("direct", &program)).await;
    assert_eq!(response, OAuthResponse::completed());
    assert_eq!(dir.read("args").trim(), "--auth");

    let snapshot = orchestrator.status("direct").unwrap();
    assert_eq!(snapshot.outcome, Some(SessionOutcome::CompletedWithoutToken));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_helper_failure_hides_raw_output() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "echo 'Error: EACCES: permission denied, mkdir /home/alice/.mcp-auth' >&2\nexit 1",
    );
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(bridge_request("fail", &program)).await;
    assert!(!response.success);
    let message = response.error.unwrap();
    assert!(!message.contains("EACCES"));
    assert_eq!(
        message,
        OAuthError::ProcessExit { code: Some(1), tail: String::new() }.user_message()
    );

    let snapshot = orchestrator.status("fail").unwrap();
    assert_eq!(snapshot.state, SessionState::Failed);
    match snapshot.outcome {
        Some(SessionOutcome::Error(detail)) => {
            assert!(detail.contains("exit code 1"));
            assert!(detail.contains("EACCES"));
        }
        other => panic!("expected error outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bridge_exiting_cleanly_without_signal_fails() {
    let dir = ScriptDir::new();
    let program = dir.script("mcp-remote", "echo 'nothing to see'\nexit 0");
    let orchestrator = unsandboxed(fast_settings());

    let response = orchestrator.start_oauth(bridge_request("quiet", &program)).await;
    assert!(!response.success);
    assert_eq!(orchestrator.status("quiet").unwrap().state, SessionState::Failed);
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let orchestrator = unsandboxed(fast_settings());
    let response = orchestrator
        .start_oauth(bridge_request("missing", "/nonexistent/dir/mcp-remote"))
        .await;

    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("Could not start the authentication helper. Check that it is installed")
    );
    assert_eq!(orchestrator.status("missing").unwrap().state, SessionState::Failed);
}

#[tokio::test]
async fn test_builder_error_creates_no_session() {
    let orchestrator = unsandboxed(fast_settings());
    let request = OAuthRequest::new("nourl", "NoUrl", "npx").with_args(["-y", "mcp-remote"]);

    let response = orchestrator.start_oauth(request).await;
    assert!(!response.success);
    assert!(orchestrator.status("nourl").is_none());
    assert!(orchestrator.list_sessions().is_empty());
}

#[tokio::test]
async fn test_request_env_reaches_helper() {
    let dir = ScriptDir::new();
    let program = dir.script(
        "mcp-remote",
        "echo \"Visit https://auth.example.com/authorize?region=$API_REGION\"\nexec sleep 30",
    );
    let orchestrator = unsandboxed(fast_settings());

    let env: HashMap<String, String> = [("API_REGION".to_string(), "eu".to_string())].into();
    let response = orchestrator
        .start_oauth(bridge_request("env", &program).with_env(env))
        .await;
    assert_eq!(
        response.oauth_url.as_deref(),
        Some("https://auth.example.com/authorize?region=eu")
    );
    orchestrator.shutdown().await;
}
