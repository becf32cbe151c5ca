//! Shared test utilities and fixtures for AuthMux integration tests.

pub use authmux_core::{
    CredentialHandoff, CredentialSink, OAuthEvent, OAuthRequest, OAuthResponse, OAuthSettings,
    SessionState,
};
pub use authmux_gateway::{OAuthOrchestrator, SandboxAdapter};

/// Opt-in log output: `RUST_LOG=debug cargo test -p tests`
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Request and settings fixtures
pub mod fixtures {
    use super::*;

    /// Remote endpoint used by bridge fixtures
    pub const REMOTE_URL: &str = "https://mcp.example.com/sse";

    /// Settings with short timers so lifecycle tests finish quickly
    pub fn fast_settings() -> OAuthSettings {
        OAuthSettings {
            detection_timeout_secs: 3,
            session_timeout_secs: 10,
            cleanup_delay_ms: 500,
            terminate_grace_ms: 300,
            partial_line_flush_ms: 200,
            output_settle_ms: 1_000,
            bridge_tools: vec!["mcp-remote".to_string(), "proxy-tool".to_string()],
            ..OAuthSettings::default()
        }
    }

    /// Remote-proxy request running `program` as the bridge tool
    pub fn bridge_request(server_id: &str, program: &str) -> OAuthRequest {
        OAuthRequest::new(server_id, server_id.to_uppercase(), program)
            .with_args(["-y", "proxy-tool", REMOTE_URL])
    }

    /// Direct request running `program` as the server itself
    pub fn direct_request(server_id: &str, program: &str) -> OAuthRequest {
        OAuthRequest::new(server_id, server_id.to_uppercase(), program)
            .with_server_url("https://direct.example.com/mcp")
    }

    /// Orchestrator over `settings` with every sandbox backend disabled
    pub fn unsandboxed(settings: OAuthSettings) -> OAuthOrchestrator {
        OAuthOrchestrator::new(settings)
            .expect("valid settings")
            .with_sandbox(SandboxAdapter::disabled())
    }
}

/// Binary locators with a fixed view of `PATH`
pub mod locators {
    use authmux_gateway::BinaryLocator;
    use std::collections::HashSet;
    use std::path::PathBuf;

    /// Locates exactly the listed programs under `/usr/bin`
    #[derive(Default)]
    pub struct FakeLocator {
        present: HashSet<String>,
    }

    impl FakeLocator {
        pub fn with(programs: &[&str]) -> Self {
            Self {
                present: programs.iter().map(|p| p.to_string()).collect(),
            }
        }

        pub fn empty() -> Self {
            Self::default()
        }
    }

    impl BinaryLocator for FakeLocator {
        fn locate(&self, program: &str) -> Option<PathBuf> {
            self.present
                .contains(program)
                .then(|| PathBuf::from("/usr/bin").join(program))
        }
    }
}

/// Credential sink that records every hand-off
pub mod sinks {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingCredentialSink {
        stored: Mutex<Vec<CredentialHandoff>>,
    }

    impl RecordingCredentialSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn stored(&self) -> Vec<CredentialHandoff> {
            self.stored.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialSink for RecordingCredentialSink {
        async fn store(&self, handoff: CredentialHandoff) -> anyhow::Result<()> {
            self.stored.lock().unwrap().push(handoff);
            Ok(())
        }
    }
}

/// Helper scripts written to a temporary directory
#[cfg(unix)]
pub mod scripts {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    pub struct ScriptDir {
        dir: TempDir,
    }

    impl ScriptDir {
        pub fn new() -> Self {
            Self {
                dir: TempDir::new().expect("Failed to create temp dir"),
            }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Path of a file in the script dir, for scripts to write markers to
        pub fn file(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        /// Write an executable `/bin/sh` script named `name`
        pub fn script(&self, name: &str, body: &str) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod script");
            path.to_string_lossy().to_string()
        }

        pub fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.file(name)).unwrap_or_default()
        }
    }

    impl Default for ScriptDir {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Whether a pid is still running. Zombies (killed, not yet reaped by an
    /// init that never reaps) count as dead.
    pub fn pid_alive(pid: u32) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // "<pid> (<comm>) <state> ..."
            return stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X");
        }
        if std::path::Path::new("/proc/self").exists() {
            return false;
        }
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Poll until `path` has content
    pub async fn wait_for_file(path: &Path, within: std::time::Duration) -> String {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Ok(content) = std::fs::read_to_string(path) {
                if !content.trim().is_empty() {
                    return content;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return String::new();
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

/// Event testing utilities
pub mod events {
    use authmux_core::{EventReceiver, OAuthEvent};
    use std::time::Duration;

    /// Collect events until `timeout` passes with nothing new
    pub async fn collect_events(rx: &mut EventReceiver, timeout: Duration) -> Vec<OAuthEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(timeout, rx.recv()).await {
            events.push(event);
        }
        events
    }

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(
        rx: &mut EventReceiver,
        timeout: Duration,
        predicate: F,
    ) -> Option<OAuthEvent>
    where
        F: Fn(&OAuthEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

/// Async test helpers
pub mod async_helpers {
    use std::time::Duration;
    use tokio::time::timeout;

    /// Run an async operation with a timeout
    pub async fn with_timeout<F, T>(duration: Duration, f: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        timeout(duration, f).await.expect("Operation timed out")
    }

    /// Default test timeout (10 seconds)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
}
