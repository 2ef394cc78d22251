//! C8 Progress Bus.
//!
//! Grounded on `events/bus.rs`: a `tokio::sync::broadcast` channel wrapped
//! with session/task filtering, matching the teacher's `EventBus` +
//! `FilteredReceiver` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventKind {
    /// Coarse-grained phase/progress update for a session.
    AgentProgress { phase: String, progress: u8 },
    /// Task-level lifecycle transition.
    AgentTask { task_id: Uuid, status: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventKind,
}

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast-based pub/sub, one bus per process, shared across sessions.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, session_id: Uuid, payload: EventKind) {
        let event = Event {
            session_id,
            timestamp: Utc::now(),
            payload,
        };
        // A broadcast send fails only when there are no receivers; that is
        // a normal state (no subscriber yet) and not an error worth logging.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe filtered to a single session, the way `events/bus.rs`
    /// offers a `FilteredReceiver` instead of making every caller filter
    /// by hand.
    pub fn subscribe_session(&self, session_id: Uuid) -> FilteredReceiver {
        FilteredReceiver {
            inner: self.sender.subscribe(),
            session_id,
        }
    }
}

pub struct FilteredReceiver {
    inner: broadcast::Receiver<Event>,
    session_id: Uuid,
}

impl FilteredReceiver {
    /// Awaits the next event belonging to this receiver's session,
    /// silently skipping (and logging lag on) everything else.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.inner.recv().await {
                Ok(event) if event.session_id == self.session_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_filtered_receive() {
        let bus = EventBus::new();
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let mut rx_a = bus.subscribe_session(session_a);

        bus.publish(
            session_b,
            EventKind::AgentProgress {
                phase: "generation".into(),
                progress: 40,
            },
        );
        bus.publish(
            session_a,
            EventKind::AgentProgress {
                phase: "planning".into(),
                progress: 15,
            },
        );

        let event = rx_a.recv().await.expect("event for session_a");
        assert_eq!(event.session_id, session_a);
        match event.payload {
            EventKind::AgentProgress { phase, progress } => {
                assert_eq!(phase, "planning");
                assert_eq!(progress, 15);
            }
            _ => panic!("unexpected payload"),
        }
    }

    #[tokio::test]
    async fn test_no_receivers_does_not_error() {
        let bus = EventBus::new();
        bus.publish(
            Uuid::new_v4(),
            EventKind::AgentTask {
                task_id: Uuid::new_v4(),
                status: "completed".into(),
            },
        );
    }
}
