//! Pub/sub channel carrying conversation events between tabs.
//!
//! Delivery is best-effort: a lagging receiver loses events and a transport may
//! replay them, so every handler must be idempotent.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::chat::core::ids::{ConversationId, TabId};

/// Event broadcast to other tabs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A temporary conversation got its durable id.
    ConversationMigrated {
        /// Locally minted id.
        temporary: ConversationId,
        /// Backend-assigned id.
        durable: ConversationId,
    },
    /// A tab started streaming a reply.
    StreamingStarted {
        /// Conversation being streamed.
        conversation_id: ConversationId,
    },
    /// A tab stopped streaming (result or failure).
    StreamingStopped {
        /// Conversation that was streamed.
        conversation_id: ConversationId,
    },
}

/// Event tagged with the tab that emitted it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Emitting tab.
    pub origin: TabId,
    /// Payload.
    pub event: SyncEvent,
}

/// Shared channel; clone it into every tab of the same account.
#[derive(Clone, Debug)]
pub struct SyncBus {
    sender: broadcast::Sender<SyncEnvelope>,
}

impl SyncBus {
    /// Create a channel buffering `capacity` events per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Broadcast an event; returns how many receivers got it.
    pub fn publish(&self, origin: TabId, event: SyncEvent) -> usize {
        let envelope = SyncEnvelope { origin, event };
        match self.sender.send(envelope) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No tab listening for sync events");
                0
            }
        }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEnvelope> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = SyncBus::new(8);
        let mut receiver = bus.subscribe();
        let origin = TabId::new();
        let event = SyncEvent::StreamingStarted {
            conversation_id: ConversationId::durable("c-1"),
        };

        assert_eq!(bus.publish(origin, event.clone()), 1);

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.origin, origin);
        assert_eq!(envelope.event, event);
    }

    #[test]
    fn publish_without_receivers_is_not_an_error() {
        let bus = SyncBus::new(8);
        let sent = bus.publish(
            TabId::new(),
            SyncEvent::StreamingStopped {
                conversation_id: ConversationId::durable("c-1"),
            },
        );
        assert_eq!(sent, 0);
    }

    #[test]
    fn envelope_serializes_with_tagged_event() {
        let envelope = SyncEnvelope {
            origin: TabId::new(),
            event: SyncEvent::ConversationMigrated {
                temporary: ConversationId::durable("temp_1_abc"),
                durable: ConversationId::durable("c-1"),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"]["type"], "conversation_migrated");
        assert_eq!(json["event"]["durable"], "c-1");
    }
}
