//! Deadlines, cancellation, cleanup and events

use std::sync::Arc;
use std::time::Duration;

use authmux_core::OAuthError;
use pretty_assertions::assert_eq;
use tests::events::collect_events;
use tests::fixtures::{bridge_request, fast_settings, unsandboxed};
use tests::scripts::{pid_alive, ScriptDir};
use tests::*;

fn url_then_sleep(dir: &ScriptDir) -> String {
    dir.script(
        "mcp-remote",
        "echo 'Visit https://auth.example.com/authorize?s=1'\nexec sleep 30",
    )
}

fn short_deadline() -> OAuthSettings {
    OAuthSettings {
        detection_timeout_secs: 1,
        session_timeout_secs: 2,
        ..fast_settings()
    }
}

#[tokio::test]
async fn test_session_deadline_terminates_helper_then_cleans_up() {
    let dir = ScriptDir::new();
    let orchestrator = unsandboxed(short_deadline());

    let response = orchestrator
        .start_oauth(bridge_request("slow-user", &url_then_sleep(&dir)))
        .await;
    assert!(response.success);

    let session = orchestrator.registry().get("slow-user").unwrap();
    let pid = session.pid().unwrap();
    assert!(pid_alive(pid));

    let snapshot = orchestrator
        .wait_for_completion("slow-user", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::TimedOut);
    assert!(!pid_alive(pid), "helper outlived its session");

    // Removed after the cleanup delay; a late terminate is a no-op
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(orchestrator.status("slow-user").is_none());
    assert!(!session.terminate().await);
}

#[tokio::test]
async fn test_detection_timeout_leaves_session_running() {
    let dir = ScriptDir::new();
    let program = dir.script("mcp-remote", "echo 'Starting proxy...'\nexec sleep 30");
    let orchestrator = unsandboxed(short_deadline());

    let response = orchestrator.start_oauth(bridge_request("silent", &program)).await;
    assert_eq!(response, OAuthResponse::error(OAuthError::Timeout.user_message()));

    let snapshot = orchestrator.status("silent").unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_kills_helper() {
    let dir = ScriptDir::new();
    let orchestrator = unsandboxed(fast_settings());

    assert!(orchestrator
        .start_oauth(bridge_request("cancel-me", &url_then_sleep(&dir)))
        .await
        .success);
    let pid = orchestrator.status("cancel-me").unwrap().pid.unwrap();

    assert_eq!(orchestrator.cancel("cancel-me").await, Some(SessionState::Cancelled));
    assert!(!pid_alive(pid));

    // Cancelling again, or an unknown server, changes nothing
    assert_eq!(orchestrator.cancel("cancel-me").await, Some(SessionState::Cancelled));
    assert_eq!(orchestrator.cancel("unknown").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_starting_leaves_no_helper() {
    let dir = ScriptDir::new();
    let pid_file = dir.file("helper.pid");
    let program = dir.script(
        "mcp-remote",
        &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
    );
    let orchestrator = Arc::new(unsandboxed(fast_settings()));

    // Fires as soon as the session is registered, before or during spawn
    let canceller = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            loop {
                if let Some(state) = orchestrator.cancel("race").await {
                    return state;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let response = orchestrator.start_oauth(bridge_request("race", &program)).await;
    let state = canceller.await.expect("cancel task panicked");

    assert_eq!(state, SessionState::Cancelled);
    assert_eq!(response, OAuthResponse::error(OAuthError::Cancelled.user_message()));
    if let Ok(pid) = std::fs::read_to_string(&pid_file) {
        if let Ok(pid) = pid.trim().parse::<u32>() {
            assert!(!pid_alive(pid), "helper outlived a cancel during start");
        }
    }
    assert_eq!(orchestrator.status("race").unwrap().state, SessionState::Cancelled);
}

#[tokio::test]
async fn test_state_change_events_in_order() {
    let dir = ScriptDir::new();
    let orchestrator = unsandboxed(fast_settings());
    let mut events = orchestrator.subscribe();

    assert!(orchestrator
        .start_oauth(bridge_request("evt", &url_then_sleep(&dir)))
        .await
        .success);
    orchestrator.cancel("evt").await;

    let states: Vec<SessionState> = collect_events(&mut events, Duration::from_millis(500))
        .await
        .into_iter()
        .filter_map(|e| match e {
            OAuthEvent::SessionStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![SessionState::Running, SessionState::UrlIssued, SessionState::Cancelled]
    );
}

#[tokio::test]
async fn test_shutdown_drains_all_sessions() {
    let dir_a = ScriptDir::new();
    let dir_b = ScriptDir::new();
    let orchestrator = unsandboxed(fast_settings());

    assert!(orchestrator.start_oauth(bridge_request("a", &url_then_sleep(&dir_a))).await.success);
    assert!(orchestrator.start_oauth(bridge_request("b", &url_then_sleep(&dir_b))).await.success);
    let pids: Vec<u32> = orchestrator
        .list_sessions()
        .iter()
        .filter_map(|s| s.pid)
        .collect();
    assert_eq!(pids.len(), 2);

    orchestrator.shutdown().await;
    assert!(orchestrator.list_sessions().is_empty());
    assert!(pids.iter().all(|pid| !pid_alive(*pid)));
}
