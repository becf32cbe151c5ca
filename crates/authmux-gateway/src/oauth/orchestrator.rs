//! OAuth Orchestrator - the caller-facing entry point
//!
//! `start_oauth` builds the helper invocation, wraps it in a sandbox when one
//! is installed, admits a session (single-flight per server), spawns the
//! helper and waits for the first signal or the detection deadline. The
//! helper keeps running in a per-session drive task after the caller gets its
//! URL; the drive task owns the session deadline.
//!
//! Every failure leaves this module as `OAuthResponse { success: false }`
//! with a generic message. Details go to tracing and the per-server log.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use authmux_core::{
    CredentialHandoff, CredentialSink, DuplicatePolicy, EventBus, EventReceiver, LogLevel,
    LogSource, OAuthError, OAuthEvent, OAuthRequest, OAuthResponse, OAuthSettings, ServerLog,
    ServerLogManager, ServerType, SessionOutcome, SessionSnapshot, SessionState,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use super::invocation::InvocationBuilder;
use super::registry::{Admission, SessionRegistry};
use super::scanner::{OutputScanner, ScanSignal, ScannerRules};
use super::session::{OAuthSession, SessionSpec, SessionStatus};
use crate::process::{OutputStream, ProcessEvent, ProcessSupervisor, SupervisorOptions};
use crate::sandbox::SandboxAdapter;

/// Shared by the orchestrator and every drive task
struct DriveShared {
    registry: Arc<SessionRegistry>,
    rules: ScannerRules,
    output_settle: Duration,
    log_manager: Option<Arc<ServerLogManager>>,
    credential_sink: Option<Arc<dyn CredentialSink>>,
}

pub struct OAuthOrchestrator {
    settings: OAuthSettings,
    builder: InvocationBuilder,
    sandbox: SandboxAdapter,
    supervisor: ProcessSupervisor,
    event_bus: EventBus,
    shared: Arc<DriveShared>,
}

impl OAuthOrchestrator {
    /// Orchestrator with `PATH`-based sandbox detection and a private event bus
    pub fn new(settings: OAuthSettings) -> Result<Self> {
        settings.validate()?;
        let event_bus = EventBus::new();
        let registry = SessionRegistry::new(settings.cleanup_delay(), settings.output_buffer_limit)
            .with_event_sender(event_bus.sender());

        Ok(Self {
            builder: InvocationBuilder::new(&settings),
            sandbox: SandboxAdapter::from_settings(&settings.sandbox),
            supervisor: ProcessSupervisor::new(SupervisorOptions::from(&settings)),
            shared: Arc::new(DriveShared {
                registry: Arc::new(registry),
                rules: ScannerRules::from_settings(&settings)?,
                output_settle: settings.output_settle(),
                log_manager: None,
                credential_sink: None,
            }),
            event_bus,
            settings,
        })
    }

    pub fn with_sandbox(mut self, sandbox: SandboxAdapter) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Publish session events on a host-owned bus
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        let registry = SessionRegistry::new(
            self.settings.cleanup_delay(),
            self.settings.output_buffer_limit,
        )
        .with_event_sender(event_bus.sender());
        self.event_bus = event_bus;
        self.update_shared(|shared| shared.registry = Arc::new(registry));
        self
    }

    pub fn with_log_manager(mut self, log_manager: Arc<ServerLogManager>) -> Self {
        self.update_shared(|shared| shared.log_manager = Some(log_manager));
        self
    }

    pub fn with_credential_sink(mut self, sink: Arc<dyn CredentialSink>) -> Self {
        self.update_shared(|shared| shared.credential_sink = Some(sink));
        self
    }

    /// Builder methods run before any session exists, so the Arc is unique
    fn update_shared(&mut self, update: impl FnOnce(&mut DriveShared)) {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => update(shared),
            None => warn!("[OAuth] Configuration change ignored: sessions already running"),
        }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    pub fn status(&self, server_id: &str) -> Option<SessionSnapshot> {
        self.shared.registry.snapshot(server_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.shared.registry.list()
    }

    pub async fn cancel(&self, server_id: &str) -> Option<SessionState> {
        info!(server_id = %server_id, "[OAuth] Cancel requested");
        self.shared.registry.cancel(server_id).await
    }

    /// Cancel every session; call on host shutdown
    pub async fn shutdown(&self) {
        self.shared.registry.shutdown().await;
    }

    /// Wait until the server's current session is terminal or `within`
    /// elapses, returning its last snapshot.
    pub async fn wait_for_completion(
        &self,
        server_id: &str,
        within: Duration,
    ) -> Option<SessionSnapshot> {
        let session = self.shared.registry.get(server_id)?;
        let mut status = session.watch_status();
        let _ = tokio::time::timeout(within, async {
            loop {
                if status.borrow_and_update().state.is_terminal() {
                    return;
                }
                if status.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        Some(session.snapshot())
    }

    /// Bootstrap OAuth for one server. Never fails; errors become
    /// `success: false` responses.
    pub async fn start_oauth(&self, request: OAuthRequest) -> OAuthResponse {
        match self.try_start_oauth(&request).await {
            Ok(response) => response,
            Err(err) => {
                let level = if err.is_retryable() {
                    info!(server_id = %request.server_id, "[OAuth] {}", err);
                    LogLevel::Warn
                } else {
                    error!(server_id = %request.server_id, "[OAuth] {}", err);
                    LogLevel::Error
                };
                self.log_server(&request.server_id, level, LogSource::OAuth, err.to_string())
                    .await;
                OAuthResponse::error(err.user_message())
            }
        }
    }

    async fn try_start_oauth(&self, request: &OAuthRequest) -> Result<OAuthResponse, OAuthError> {
        let base = self.builder.build(request)?;

        if !request.sandboxing_requested {
            debug!(server_id = %request.server_id, "[OAuth] Sandboxing forced on for OAuth helper");
        }
        let decision = self.sandbox.apply(&base.invocation, true);

        let spec = SessionSpec {
            server_id: request.server_id.clone(),
            server_name: request.server_name.clone(),
            server_type: base.server_type,
            invocation: decision.invocation,
            callback_port: base.callback_port,
            sandbox: decision.backend,
            remote_url: base.remote_url,
            lifetime: self.settings.session_timeout(),
        };

        let session = match self.shared.registry.admit(spec) {
            Admission::Created(session) => session,
            Admission::Existing(existing) => {
                let policy = request
                    .duplicate_policy
                    .unwrap_or(self.settings.duplicate_policy);
                return self.handle_duplicate(request, existing, policy).await;
            }
        };

        info!(
            server_id = %session.server_id(),
            session_id = %session.id(),
            server_type = session.server_type().as_str(),
            callback_port = ?session.callback_port(),
            "[OAuth] Starting session for {}",
            session.server_name()
        );

        match decision.backend {
            Some(backend) => {
                self.log_session(&session, LogLevel::Info, LogSource::Sandbox, format!("sandbox: {}", backend))
                    .await
            }
            None => {
                warn!(
                    server_id = %session.server_id(),
                    session_id = %session.id(),
                    "[OAuth] No sandbox backend available, helper runs unconfined"
                );
                self.shared.registry.emit(OAuthEvent::SandboxUnavailable {
                    server_id: session.server_id().to_string(),
                    session_id: session.id(),
                });
                self.log_session(
                    &session,
                    LogLevel::Warn,
                    LogSource::Sandbox,
                    "no sandbox backend available; running unconfined",
                )
                .await;
            }
        }

        self.supervisor.prepare_environment().await;
        if session.cancel_token().is_cancelled() {
            debug!(session_id = %session.id(), "[OAuth] Cancelled before spawn");
            return Err(OAuthError::Cancelled);
        }

        let spawned = match self.supervisor.spawn(session.invocation()) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.shared.registry.transition(
                    &session,
                    SessionState::Failed,
                    Some(SessionOutcome::Error(err.to_string())),
                    Some("spawn failed".to_string()),
                );
                return Err(err);
            }
        };

        let pid = spawned.handle.pid();
        if let Err(handle) = session.attach_process(spawned.handle).await {
            info!(
                server_id = %session.server_id(),
                session_id = %session.id(),
                pid = ?pid,
                "[OAuth] Cancelled while starting, terminating helper"
            );
            handle.terminate().await;
            return Err(OAuthError::Cancelled);
        }
        self.log_session(
            &session,
            LogLevel::Info,
            LogSource::Process,
            format!("spawned pid {:?}: {}", pid, session.invocation().display_command()),
        )
        .await;
        self.shared
            .registry
            .transition(&session, SessionState::Running, None, None);

        spawn_drive_task(self.shared.clone(), session.clone(), spawned.events);

        match wait_for_signal(&session, self.settings.detection_timeout()).await {
            Some(status) => Ok(response_for(&status)),
            None => {
                info!(
                    server_id = %session.server_id(),
                    session_id = %session.id(),
                    "[OAuth] No signal within detection window; helper keeps running"
                );
                Err(OAuthError::Timeout)
            }
        }
    }

    async fn handle_duplicate(
        &self,
        request: &OAuthRequest,
        existing: Arc<OAuthSession>,
        policy: DuplicatePolicy,
    ) -> Result<OAuthResponse, OAuthError> {
        let in_progress = || OAuthError::AlreadyInProgress {
            server_id: request.server_id.clone(),
        };
        debug!(
            server_id = %request.server_id,
            session_id = %existing.id(),
            state = %existing.state(),
            policy = ?policy,
            "[OAuth] Request collided with live session"
        );

        match policy {
            DuplicatePolicy::Reject => Err(in_progress()),
            DuplicatePolicy::Reattach => {
                match wait_for_signal(&existing, self.settings.detection_timeout()).await {
                    Some(status) => Ok(response_for(&status)),
                    None => Err(in_progress()),
                }
            }
        }
    }

    async fn log_session(
        &self,
        session: &OAuthSession,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
    ) {
        append_log(&self.shared, session, level, source, message.into()).await;
    }

    async fn log_server(&self, server_id: &str, level: LogLevel, source: LogSource, message: String) {
        if let Some(log_manager) = &self.shared.log_manager {
            if let Err(e) = log_manager
                .append(server_id, ServerLog::new(level, source, message))
                .await
            {
                warn!("[OAuth] Failed to write server log: {}", e);
            }
        }
    }
}

/// Wait until the session has a URL/token or is terminal
async fn wait_for_signal(session: &OAuthSession, within: Duration) -> Option<SessionStatus> {
    let mut status = session.watch_status();
    tokio::time::timeout(within, async {
        loop {
            {
                let current = status.borrow_and_update();
                if current.is_settled() {
                    return Some(current.clone());
                }
            }
            if status.changed().await.is_err() {
                return None;
            }
        }
    })
    .await
    .ok()
    .flatten()
}

fn response_for(status: &SessionStatus) -> OAuthResponse {
    let user_error = match status.state {
        SessionState::TimedOut => OAuthError::Timeout.user_message(),
        SessionState::Cancelled => OAuthError::Cancelled.user_message(),
        _ => OAuthError::ProcessExit {
            code: None,
            tail: String::new(),
        }
        .user_message(),
    };

    match (&status.outcome, status.state) {
        // A URL handed out earlier is not a success once the session failed
        (Some(SessionOutcome::AuthorizationUrl(_)), state)
            if state.is_terminal() && state != SessionState::Completed =>
        {
            OAuthResponse::error(user_error)
        }
        (Some(outcome), _) => OAuthResponse::from_outcome(outcome, &user_error),
        (None, _) => OAuthResponse::error(user_error),
    }
}

async fn append_log(
    shared: &DriveShared,
    session: &OAuthSession,
    level: LogLevel,
    source: LogSource,
    message: String,
) {
    let Some(log_manager) = &shared.log_manager else {
        return;
    };
    let log = ServerLog::new(level, source, message).for_session(session.id());
    if let Err(e) = log_manager.append(session.server_id(), log).await {
        warn!(server_id = %session.server_id(), "[OAuth] Failed to write server log: {}", e);
    }
}

/// Run the drive loop; a panic inside it fails the session instead of
/// leaking the helper.
fn spawn_drive_task(
    shared: Arc<DriveShared>,
    session: Arc<OAuthSession>,
    events: mpsc::Receiver<ProcessEvent>,
) {
    tokio::spawn(async move {
        let task = tokio::spawn(drive(shared.clone(), session.clone(), events));
        if let Err(join_error) = task.await {
            if join_error.is_cancelled() {
                return;
            }
            let err = OAuthError::Internal(anyhow!("drive task panicked: {}", join_error));
            fail_internal(&shared, &session, err).await;
        }
    });
}

/// Fail the session on an error that is not the helper's fault
async fn fail_internal(shared: &DriveShared, session: &Arc<OAuthSession>, err: OAuthError) {
    error!(
        server_id = %session.server_id(),
        session_id = %session.id(),
        "[OAuth] {}",
        err
    );
    session.terminate().await;
    append_log(shared, session, LogLevel::Error, LogSource::OAuth, err.to_string()).await;
    shared.registry.transition(
        session,
        SessionState::Failed,
        Some(SessionOutcome::Error(err.to_string())),
        Some("internal error".to_string()),
    );
}

async fn drive(
    shared: Arc<DriveShared>,
    session: Arc<OAuthSession>,
    mut events: mpsc::Receiver<ProcessEvent>,
) {
    let mut scanner = OutputScanner::new(&shared.rules);
    if let Some(remote) = session.remote_url() {
        scanner = scanner.ignore_url(remote);
    }

    let deadline = tokio::time::sleep(session.lifetime());
    tokio::pin!(deadline);
    // Armed while an unterminated line waits; any new output re-arms it
    let mut settle_at: Option<Instant> = None;

    loop {
        let event = tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => {
                debug!(session_id = %session.id(), "[OAuth] Drive task stopped by cancellation");
                return;
            }
            _ = &mut deadline => {
                on_deadline(&shared, &session).await;
                return;
            }
            event = events.recv() => event,
            _ = settle(settle_at), if settle_at.is_some() => {
                settle_at = None;
                if apply_signal(&shared, &session, scanner.flush()).await {
                    return;
                }
                continue;
            }
        };

        let signal = match event {
            Some(ProcessEvent::Line { stream, bytes } | ProcessEvent::Partial { stream, bytes }) => {
                let signal = scanner.feed(&bytes);
                record_output(&shared, &session, stream, &bytes, &signal).await;
                settle_at = scanner
                    .has_pending()
                    .then(|| Instant::now() + shared.output_settle);
                signal
            }
            Some(ProcessEvent::Exited { code }) => {
                let signal = scanner.finish();
                if apply_signal(&shared, &session, signal).await {
                    return;
                }
                on_exit(&shared, &session, &scanner, code).await;
                return;
            }
            None => {
                let signal = scanner.finish();
                if apply_signal(&shared, &session, signal).await {
                    return;
                }
                on_exit(&shared, &session, &scanner, None).await;
                return;
            }
        };

        if apply_signal(&shared, &session, signal).await {
            return;
        }
    }
}

async fn settle(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Returns `true` once the session is terminal
async fn apply_signal(shared: &DriveShared, session: &Arc<OAuthSession>, signal: ScanSignal) -> bool {
    let registry = &shared.registry;
    match signal {
        ScanSignal::NoSignal => {}
        ScanSignal::UrlFound(url) => {
            debug!(session_id = %session.id(), url = %url, "[OAuth] Authorization URL detected");
            registry.transition(
                session,
                SessionState::UrlIssued,
                Some(SessionOutcome::AuthorizationUrl(url)),
                Some("authorization URL issued".to_string()),
            );
        }
        ScanSignal::TokenFound(token) => {
            if registry.transition(
                session,
                SessionState::Completed,
                Some(SessionOutcome::Token(token.clone())),
                Some("token received".to_string()),
            ) {
                hand_off_token(shared, session, token).await;
            }
        }
        ScanSignal::CompletionMarker => {
            registry.transition(
                session,
                SessionState::Completed,
                Some(SessionOutcome::CompletedWithoutToken),
                Some("helper reported success".to_string()),
            );
        }
    }
    session.state().is_terminal()
}

async fn hand_off_token(shared: &DriveShared, session: &OAuthSession, token: String) {
    let Some(sink) = &shared.credential_sink else {
        debug!(session_id = %session.id(), "[OAuth] No credential sink; token returned to caller only");
        return;
    };

    let provider_hint = session
        .remote_url()
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| u.host_str().map(String::from))
        .or_else(|| Some(session.server_name().to_string()));

    let handoff = CredentialHandoff {
        server_id: session.server_id().to_string(),
        token,
        provider_hint,
    };
    match sink.store(handoff).await {
        Ok(()) => info!(server_id = %session.server_id(), "[OAuth] Token handed to credential store"),
        Err(e) => error!(server_id = %session.server_id(), "[OAuth] Credential store failed: {:#}", e),
    }
}

async fn on_deadline(shared: &DriveShared, session: &Arc<OAuthSession>) {
    warn!(
        server_id = %session.server_id(),
        session_id = %session.id(),
        lifetime_secs = session.lifetime().as_secs(),
        "[OAuth] Session deadline elapsed, terminating helper"
    );
    session.terminate().await;
    shared.registry.transition(
        session,
        SessionState::TimedOut,
        Some(SessionOutcome::Error(OAuthError::Timeout.to_string())),
        Some("session deadline elapsed".to_string()),
    );
    append_log(shared, session, LogLevel::Warn, LogSource::OAuth, "session timed out".to_string()).await;
}

/// Exit without a token or marker
async fn on_exit(
    shared: &DriveShared,
    session: &Arc<OAuthSession>,
    scanner: &OutputScanner<'_>,
    code: Option<i32>,
) {
    if session.state().is_terminal() {
        return;
    }

    // Direct servers finish their flow and exit; a clean exit is success.
    // Bridge tools stay up as proxies, so exiting without a marker is not.
    let implicit_success = session.server_type() == ServerType::Direct
        && code == Some(0)
        && scanner.error_lines() == 0;
    if implicit_success {
        shared.registry.transition(
            session,
            SessionState::Completed,
            Some(SessionOutcome::CompletedWithoutToken),
            Some("helper exited cleanly".to_string()),
        );
        return;
    }

    let err = OAuthError::ProcessExit {
        code,
        tail: session.output_tail().await,
    };
    error!(
        server_id = %session.server_id(),
        session_id = %session.id(),
        code = ?code,
        url_issued = scanner.url().is_some(),
        "[OAuth] {}",
        err
    );
    append_log(shared, session, LogLevel::Error, LogSource::Process, err.to_string()).await;
    shared.registry.transition(
        session,
        SessionState::Failed,
        Some(SessionOutcome::Error(err.to_string())),
        Some(match code {
            Some(c) => format!("helper exited with code {}", c),
            None => "helper killed by signal".to_string(),
        }),
    );
}

async fn record_output(
    shared: &DriveShared,
    session: &OAuthSession,
    stream: OutputStream,
    bytes: &[u8],
    signal: &ScanSignal,
) {
    session.append_output(bytes).await;

    if shared.log_manager.is_none() {
        return;
    }
    let mut line = String::from_utf8_lossy(bytes).trim_end().to_string();
    if line.is_empty() {
        return;
    }
    if let ScanSignal::TokenFound(token) = signal {
        line = line.replace(token.as_str(), "[REDACTED]");
    }
    let source = match stream {
        OutputStream::Stdout => LogSource::Stdout,
        OutputStream::Stderr => LogSource::Stderr,
    };
    append_log(shared, session, LogLevel::Info, source, line).await;
}
