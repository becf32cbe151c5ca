//! Helper process spawning tests
//!
//! Platform flags (process group on Unix, CREATE_NO_WINDOW on Windows) must
//! not break child I/O, and the supervisor must deliver ordered output and
//! exactly one exit event.

use std::process::Stdio;
use std::time::Duration;

use authmux_core::{Invocation, OAuthError};
use authmux_gateway::{
    configure_child_process_platform, ProcessEvent, ProcessSupervisor, SupervisorOptions,
};
use tokio::process::Command;

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorOptions {
        partial_line_flush: Duration::from_millis(100),
        terminate_grace: Duration::from_millis(300),
    })
}

/// Verify that `configure_child_process_platform` can be applied to a Command
/// without panicking and the resulting process runs correctly.
#[tokio::test]
async fn test_platform_flags_do_not_break_child_process() {
    #[cfg(windows)]
    let (program, args) = ("cmd.exe", vec!["/C", "echo", "hello"]);
    #[cfg(unix)]
    let (program, args) = ("echo", vec!["hello"]);

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    configure_child_process_platform(&mut cmd);

    let output = cmd.output().await.expect("Failed to spawn child process");
    assert!(output.status.success(), "Child process exited with error");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.trim().contains("hello"),
        "Expected 'hello' in stdout, got: {stdout}"
    );
}

/// Applying the flags twice is harmless
#[tokio::test]
async fn test_platform_flags_idempotent() {
    #[cfg(windows)]
    let program = "cmd.exe";
    #[cfg(unix)]
    let program = "true";

    let mut cmd = Command::new(program);
    #[cfg(windows)]
    cmd.args(["/C", "exit", "0"]);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    configure_child_process_platform(&mut cmd);
    configure_child_process_platform(&mut cmd);

    let status = cmd.status().await.expect("Failed to spawn child process");
    assert!(status.success(), "Child process should exit successfully");
}

#[tokio::test]
async fn test_missing_helper_is_spawn_error() {
    let result = supervisor().spawn(&Invocation::new("nonexistent_helper_that_does_not_exist_abc123"));
    match result {
        Err(OAuthError::Spawn { program, .. }) => {
            assert_eq!(program, "nonexistent_helper_that_does_not_exist_abc123")
        }
        Err(other) => panic!("Expected spawn error, got {other}"),
        Ok(_) => panic!("Expected spawn error for nonexistent helper"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_event_is_last_and_once() {
    let inv = Invocation::new("/bin/sh").with_args(["-c", "for i in 1 2 3; do echo line$i; done; exit 3"]);
    let mut spawned = supervisor().spawn(&inv).unwrap();

    let mut lines = Vec::new();
    let mut exits = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), spawned.events.recv()).await {
        match event {
            ProcessEvent::Line { bytes, .. } => {
                assert!(exits.is_empty(), "output after exit event");
                lines.push(String::from_utf8_lossy(&bytes).trim_end().to_string());
            }
            ProcessEvent::Partial { .. } => {}
            ProcessEvent::Exited { code } => exits.push(code),
        }
        if !exits.is_empty() {
            break;
        }
    }

    assert_eq!(lines, vec!["line1", "line2", "line3"]);
    assert_eq!(exits, vec![Some(3)]);
    assert_eq!(spawned.handle.wait().await, Some(3));
}

/// Terminating reaches grandchildren through the process group
#[cfg(unix)]
#[tokio::test]
async fn test_terminate_reaches_helper_tree() {
    let dir = tests::scripts::ScriptDir::new();
    let pid_file = dir.file("grandchild.pid");
    let body = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
    let spawned = supervisor()
        .spawn(&Invocation::new("/bin/sh").with_args(["-c", body.as_str()]))
        .unwrap();

    let pid: u32 = tests::scripts::wait_for_file(&pid_file, Duration::from_secs(5))
        .await
        .trim()
        .parse()
        .expect("grandchild pid");
    assert!(tests::scripts::pid_alive(pid));

    assert!(spawned.handle.terminate().await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!tests::scripts::pid_alive(pid), "grandchild survived termination");
    assert!(!spawned.handle.terminate().await);
}

/// After preparation the login PATH is cached, so spawning never waits on a shell
#[tokio::test]
async fn test_prepare_environment_caches_login_path() {
    supervisor().prepare_environment().await;

    let start = std::time::Instant::now();
    let first = authmux_gateway::process::login_shell_path();
    let second = authmux_gateway::process::login_shell_path();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(first, second);
}
