//! Domain event system — decoupled observation of the engine.
//!
//! Events are published when something interesting happens: an inbound
//! event arrives, admission is denied, a tool runs, a scheduled action
//! finishes. Observers subscribe without coupling to the publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::{ActionKind, Outcome};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An inbound chat event was accepted for processing
    MessageReceived {
        transport: String,
        conversation: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The rate limiter turned a requester away
    AdmissionDenied {
        identity: String,
        timestamp: DateTime<Utc>,
    },

    /// The orchestration loop produced its final answer
    ResponseGenerated {
        conversation: String,
        rounds: u32,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A scheduled action ran (or was skipped)
    ScheduledActionFinished {
        kind: ActionKind,
        outcome: Outcome,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ScheduledActionFinished {
            kind: ActionKind::Engage,
            outcome: Outcome::Skipped,
            duration_ms: 0,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ScheduledActionFinished { kind, outcome, .. } => {
                assert_eq!(*kind, ActionKind::Engage);
                assert_eq!(*outcome, Outcome::Skipped);
            }
            _ => panic!("Expected ScheduledActionFinished event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::AdmissionDenied {
            identity: "u1".into(),
            timestamp: Utc::now(),
        });
    }
}
