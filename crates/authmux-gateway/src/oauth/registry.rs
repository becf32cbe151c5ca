//! Session Registry - single-flight map of server → live OAuth session
//!
//! The map is the only shared mutable structure. Each entry is an
//! `Arc<OAuthSession>` whose status transitions are atomic, so operations on
//! different servers never block each other and operations on one server
//! are strictly ordered.
//!
//! Terminal sessions stay visible for `cleanup_delay` (late output can drain
//! and pollers can read the result), then the helper is terminated, the
//! output released and the entry removed. Removal is keyed on the session
//! id, so a newer session for the same server is never evicted by an older
//! session's cleanup.

use std::sync::Arc;
use std::time::Duration;

use authmux_core::{EventSender, OAuthEvent, SessionOutcome, SessionSnapshot, SessionState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::session::{OAuthSession, SessionSpec};

/// Result of asking the registry to admit a new session
#[derive(Debug)]
pub enum Admission {
    /// No live session existed; this one is now registered in `Pending`
    Created(Arc<OAuthSession>),
    /// A non-terminal session for the server already exists
    Existing(Arc<OAuthSession>),
}

pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<OAuthSession>>>,
    events: Option<EventSender>,
    cleanup_delay: Duration,
    output_limit: usize,
}

impl SessionRegistry {
    pub fn new(cleanup_delay: Duration, output_limit: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            events: None,
            cleanup_delay,
            output_limit,
        }
    }

    pub fn with_event_sender(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a session for `spec.server_id` unless a live one exists.
    ///
    /// A terminal session still waiting for cleanup is replaced.
    pub fn admit(&self, spec: SessionSpec) -> Admission {
        match self.sessions.entry(spec.server_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().state().is_terminal() {
                    return Admission::Existing(occupied.get().clone());
                }
                let session = Arc::new(OAuthSession::new(spec, self.output_limit));
                debug!(
                    server_id = %session.server_id(),
                    replaced = %occupied.get().id(),
                    "[Registry] Replacing terminal session"
                );
                occupied.insert(session.clone());
                Admission::Created(session)
            }
            Entry::Vacant(vacant) => {
                let session = Arc::new(OAuthSession::new(spec, self.output_limit));
                vacant.insert(session.clone());
                Admission::Created(session)
            }
        }
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<OAuthSession>> {
        self.sessions.get(server_id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self, server_id: &str) -> Option<SessionSnapshot> {
        self.get(server_id).map(|s| s.snapshot())
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Move `session` to `next`. Invalid edges are refused and logged.
    ///
    /// On a terminal state the output is frozen and cleanup is scheduled.
    pub fn transition(
        &self,
        session: &Arc<OAuthSession>,
        next: SessionState,
        outcome: Option<SessionOutcome>,
        message: Option<String>,
    ) -> bool {
        match session.apply_transition(next, outcome) {
            Ok(previous) => {
                info!(
                    server_id = %session.server_id(),
                    session_id = %session.id(),
                    from = %previous,
                    to = %next,
                    "[Registry] Session state changed"
                );
                self.emit(OAuthEvent::SessionStateChanged {
                    server_id: session.server_id().to_string(),
                    session_id: session.id(),
                    state: next,
                    message,
                });
                if next.is_terminal() {
                    self.schedule_cleanup(session.clone());
                }
                true
            }
            Err(current) => {
                debug!(
                    server_id = %session.server_id(),
                    session_id = %session.id(),
                    current = %current,
                    refused = %next,
                    "[Registry] Ignoring invalid transition"
                );
                false
            }
        }
    }

    /// Stop the drive task, terminate the helper, then mark `Cancelled`.
    ///
    /// Returns the state the session ended in, or `None` if the server has
    /// no session.
    pub async fn cancel(&self, server_id: &str) -> Option<SessionState> {
        let session = self.get(server_id)?;
        Some(self.cancel_session(&session).await)
    }

    pub(crate) async fn cancel_session(&self, session: &Arc<OAuthSession>) -> SessionState {
        if session.state().is_terminal() {
            return session.state();
        }
        session.cancel_token().cancel();
        session.terminate().await;
        self.transition(
            session,
            SessionState::Cancelled,
            Some(SessionOutcome::Error("cancelled".to_string())),
            Some("cancelled by caller".to_string()),
        );
        session.state()
    }

    /// Cancel every live session and drop all entries
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<OAuthSession>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "[Registry] Draining sessions");
        }

        for session in &sessions {
            self.cancel_session(session).await;
            // Terminal sessions may still own a running helper awaiting cleanup
            session.terminate().await;
            session.release_output().await;
        }
        for session in sessions {
            let removed = self
                .sessions
                .remove_if(session.server_id(), |_, current| current.id() == session.id());
            if removed.is_some() {
                self.emit(OAuthEvent::SessionRemoved {
                    server_id: session.server_id().to_string(),
                    session_id: session.id(),
                });
            }
        }
    }

    fn schedule_cleanup(&self, session: Arc<OAuthSession>) {
        let sessions = self.sessions.clone();
        let events = self.events.clone();
        let delay = self.cleanup_delay;

        tokio::spawn(async move {
            session.freeze_output().await;
            tokio::time::sleep(delay).await;

            if session.terminate().await {
                debug!(
                    server_id = %session.server_id(),
                    session_id = %session.id(),
                    "[Registry] Terminated helper during cleanup"
                );
            }
            session.release_output().await;

            let removed = sessions
                .remove_if(session.server_id(), |_, current| current.id() == session.id());
            if removed.is_some() {
                debug!(
                    server_id = %session.server_id(),
                    session_id = %session.id(),
                    "[Registry] Session removed"
                );
                if let Some(events) = events {
                    events.emit(OAuthEvent::SessionRemoved {
                        server_id: session.server_id().to_string(),
                        session_id: session.id(),
                    });
                }
            }
        });
    }

    pub(crate) fn emit(&self, event: OAuthEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}
