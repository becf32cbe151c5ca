//! Event Bus - session lifecycle distribution
//!
//! The session registry and orchestrator publish [`OAuthEvent`]s here; host
//! UIs, the CLI and audit consumers subscribe.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Event Bus (broadcast channel)                │
//! │                                                             │
//! │  Producers:                 Consumers:                      │
//! │  ├─ SessionRegistry         ├─ CLI progress output          │
//! │  └─ OAuthOrchestrator       └─ Host UI bridge               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::OAuthEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast hub; every subscriber gets its own copy of every event.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OAuthEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a cloneable sender for emitting events
    pub fn sender(&self) -> EventSender {
        EventSender::new(self.sender.clone())
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Used by the registry and orchestrator to publish events
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<OAuthEvent>,
}

impl EventSender {
    fn new(sender: broadcast::Sender<OAuthEvent>) -> Self {
        Self { sender }
    }

    /// Emit an event.
    ///
    /// Returns the number of receivers; 0 when nobody listens (not an error).
    pub fn emit(&self, event: OAuthEvent) -> usize {
        let type_name = event.type_name();
        let server_id = event.server_id().to_string();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(
                    event_type = type_name,
                    server_id = %server_id,
                    receivers = count,
                    "[EventBus] Emitted event"
                );
                count
            }
            Err(_) => {
                debug!(
                    event_type = type_name,
                    server_id = %server_id,
                    "[EventBus] No receivers for event"
                );
                0
            }
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Consumer side of the bus
pub struct EventReceiver {
    receiver: broadcast::Receiver<OAuthEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<OAuthEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the channel is closed. Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<OAuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "[EventBus] Receiver lagged, skipped {} events", skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[EventBus] Channel closed");
                    return None;
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<OAuthEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(
                    skipped_events = skipped,
                    "[EventBus] Receiver lagged on try_recv"
                );
                self.receiver.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;
