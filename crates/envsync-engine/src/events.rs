//! # Progress Events
//!
//! Every state change of a running operation is published here as well as
//! written to the store. Polling `GetStatus` reads the store; anything that
//! wants push notifications subscribes to the stream instead.
//!
//! ```text
//! run task ──► publish(SyncEvent) ──┬──► broadcast channel ──► subscribers
//!                                   └──► SyncEventEmitter (optional hook)
//! ```
//!
//! A slow subscriber only loses its own backlog (`RecvError::Lagged`); the
//! run task never waits on it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use envsync_core::{ItemResult, Outcome};

/// Capacity of the broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A state change of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        operation_id: String,
    },
    Progress {
        operation_id: String,
        progress: u8,
        message: String,
    },
    ItemFinished {
        operation_id: String,
        item: ItemResult,
    },
    /// The operation is held until every conflict has a resolution.
    ConflictsDetected {
        operation_id: String,
        count: usize,
    },
    Completed {
        operation_id: String,
        outcome: Outcome,
        summary: String,
    },
    Failed {
        operation_id: String,
        error: String,
    },
}

impl SyncEvent {
    pub fn operation_id(&self) -> &str {
        match self {
            SyncEvent::Started { operation_id }
            | SyncEvent::Progress { operation_id, .. }
            | SyncEvent::ItemFinished { operation_id, .. }
            | SyncEvent::ConflictsDetected { operation_id, .. }
            | SyncEvent::Completed { operation_id, .. }
            | SyncEvent::Failed { operation_id, .. } => operation_id,
        }
    }

    /// True for the last event an operation publishes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Completed { .. } | SyncEvent::Failed { .. })
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Hook for forwarding events to another notification channel.
pub trait SyncEventEmitter: Send + Sync {
    fn emit(&self, event: &SyncEvent);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit(&self, _event: &SyncEvent) {}
}

// =============================================================================
// Event Bus
// =============================================================================

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_emitter(Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { sender, emitter }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) {
        self.emitter.emit(&event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl SyncEventEmitter for Recorder {
        fn emit(&self, event: &SyncEvent) {
            self.0.lock().unwrap().push(event.operation_id().to_string());
        }
    }

    #[tokio::test]
    async fn test_subscribers_and_emitter_see_events() {
        let recorder = Arc::new(Recorder::default());
        let bus = EventBus::with_emitter(recorder.clone());
        let mut rx = bus.subscribe();

        bus.publish(SyncEvent::Started {
            operation_id: "op-1".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation_id(), "op-1");
        assert!(!event.is_terminal());
        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["op-1"]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(SyncEvent::Failed {
            operation_id: "op-2".into(),
            error: "unreachable".into(),
        });
    }

    #[test]
    fn test_event_wire_format() {
        let event = SyncEvent::ConflictsDetected {
            operation_id: "op-3".into(),
            count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflicts_detected");
        assert_eq!(json["count"], 2);
    }
}
