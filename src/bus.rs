use crate::message::{DeliveryStatus, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// The held conversation snapshot was swapped for a new revision
    ConversationListUpdated { revision: u64, count: usize },

    /// A message was appended to the selected conversation
    MessageAppended(Message),

    /// A message advanced its delivery status
    DeliveryStatusChanged {
        conversation_id: String,
        message_id: i64,
        status: DeliveryStatus,
    },

    /// Viewport hint: a replacing load or a local send landed, consumers
    /// should jump to the newest message. Appending loads emit nothing so
    /// "load older" never yanks the viewport.
    ScrollToNewest { conversation_id: String },

    /// A system notification (e.g., poll failed, send rejected)
    SystemNotification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}
