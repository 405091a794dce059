//! Observers of registry changes.
//!
//! Two surfaces:
//! - [`SessionsListener`]: a single replaceable slot, handed the full session
//!   map after every change. Setting a new listener replaces the old one.
//! - [`SessionEventBus`]: tokio broadcast of [`SessionEvent`]s for any number
//!   of subscribers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::{SessionHandle, SessionInfo, SessionSnapshot};

const DEFAULT_CAPACITY: usize = 256;

/// Receives the complete session map after each registry change.
///
/// Runs inside the registry's mutation lock: implementations must return
/// quickly and must not call back into registry mutations.
pub trait SessionsListener: Send + Sync {
    fn sessions_changed(&self, sessions: &SessionSnapshot);
}

impl<F> SessionsListener for F
where
    F: Fn(&SessionSnapshot) + Send + Sync,
{
    fn sessions_changed(&self, sessions: &SessionSnapshot) {
        self(sessions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected {
        handle: SessionHandle,
        info: SessionInfo,
        total: usize,
    },
    Disconnected {
        handle: SessionHandle,
        info: SessionInfo,
        total: usize,
    },
    /// Every session dropped at once, on server stop.
    Cleared { removed: usize },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "session_connected",
            Self::Disconnected { .. } => "session_disconnected",
            Self::Cleared { .. } => "sessions_cleared",
        }
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        match self {
            Self::Connected { handle, .. } | Self::Disconnected { handle, .. } => Some(*handle),
            Self::Cleared { .. } => None,
        }
    }
}

/// Event with its publication time.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEventMessage {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

#[derive(Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type();
        let message = SessionEventMessage {
            timestamp: Utc::now(),
            event,
        };
        match self.sender.send(message) {
            Ok(subscribers) => debug!(event_type, subscribers, "Session event published"),
            Err(_) => debug!(event_type, "Session event published (no subscribers)"),
        }
    }

    pub fn subscribe(&self) -> SessionEventSubscriber {
        let receiver = self.sender.subscribe();
        let total = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(total, "New session event subscriber");
        SessionEventSubscriber {
            receiver,
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionEventSubscriber {
    receiver: broadcast::Receiver<SessionEventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl SessionEventSubscriber {
    /// Next event, skipping over a lag gap. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SessionEventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Session event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for SessionEventSubscriber {
    fn drop(&mut self) {
        let remaining = self.subscriber_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(remaining, "Session event subscriber dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn connected(total: usize) -> SessionEvent {
        SessionEvent::Connected {
            handle: SessionHandle::new(),
            info: SessionInfo::new("CP001", "127.0.0.1:4000".parse().unwrap()),
            total,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = SessionEventBus::new();
        let mut subscriber = bus.subscribe();

        bus.publish(connected(1));
        bus.publish(SessionEvent::Cleared { removed: 1 });

        let first = tokio::time::timeout(Duration::from_millis(100), subscriber.recv())
            .await
            .expect("timeout")
            .expect("closed");
        let second = tokio::time::timeout(Duration::from_millis(100), subscriber.recv())
            .await
            .expect("timeout")
            .expect("closed");
        assert_eq!(first.event.event_type(), "session_connected");
        assert_eq!(second.event, SessionEvent::Cleared { removed: 1 });
    }

    #[test]
    fn subscriber_count_tracks_drops() {
        let bus = SessionEventBus::new();
        let first = bus.subscribe();
        let _second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(first);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn closures_are_listeners() {
        let seen = std::sync::Mutex::new(0usize);
        let listener = |sessions: &SessionSnapshot| {
            *seen.lock().unwrap() = sessions.len();
        };
        let mut snapshot = SessionSnapshot::new();
        snapshot.insert(
            SessionHandle::new(),
            SessionInfo::new("CP001", "127.0.0.1:4000".parse().unwrap()),
        );
        listener.sessions_changed(&snapshot);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(SessionEvent::Cleared { removed: 3 }).unwrap();
        assert_eq!(value, serde_json::json!({"type": "cleared", "removed": 3}));
    }
}
