use crate::backend::SendRequest;
use crate::bus::{Event, NotificationLevel};
use crate::inbox::Inbox;
use crate::message::{DeliveryStatus, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::warn;
use uuid::Uuid;

/// Delays for the simulated provider receipts. Production uses seconds;
/// tests inject milliseconds. A real receipt feed would replace the timers
/// without touching the transition rules.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryTuning {
    pub delivered_after: Duration,
    pub read_after: Duration,
}

impl Default for DeliveryTuning {
    fn default() -> Self {
        Self {
            delivered_after: Duration::from_secs(2),
            read_after: Duration::from_secs(5),
        }
    }
}

/// Run the delivery chain for one freshly sent message. Exactly one chain is
/// spawned per message id, and it only ever moves that message forward:
/// sending -> sent -> delivered -> read, or sending -> error when the send
/// is rejected.
pub(crate) fn spawn_chain(inbox: Arc<Inbox>, message: Message, tuning: DeliveryTuning) {
    task::spawn(async move {
        let request = SendRequest {
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            client_ref: Uuid::new_v4(),
        };

        match inbox.backend().send_message(request).await {
            Ok(receipt) => {
                let id = inbox
                    .mark_sent(&message.conversation_id, message.id, receipt)
                    .await;

                tokio::time::sleep(tuning.delivered_after).await;
                inbox
                    .apply_delivery(&message.conversation_id, id, DeliveryStatus::Delivered)
                    .await;

                tokio::time::sleep(tuning.read_after).await;
                inbox
                    .apply_delivery(&message.conversation_id, id, DeliveryStatus::Read)
                    .await;
            }
            Err(e) => {
                warn!("send failed for message {}: {:#}", message.id, e);
                inbox
                    .apply_delivery(&message.conversation_id, message.id, DeliveryStatus::Error)
                    .await;
                inbox.bus().publish(Event::SystemNotification {
                    level: NotificationLevel::Error,
                    message: format!("Failed to send message: {e}"),
                });
            }
        }
    });
}
