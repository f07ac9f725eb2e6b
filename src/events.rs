//! Events the core emits to any number of listeners.
use crate::model::MessageId;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Outcome of a mutation, as a short human-readable line.
    Notification {
        level: NotificationLevel,
        operation: &'static str,
        message: String,
    },
    /// Some surface asked for the edit flow of a message to open.
    EditMessageRequested { message_id: MessageId },
}

/// Fan-out channel for [`CoreEvent`]s. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Sends to current listeners; having none is not an error.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, operation: &'static str, message: String) {
        self.emit(CoreEvent::Notification {
            level,
            operation,
            message,
        });
    }
}
