pub mod http;
pub mod sample;

use crate::conversation::{AgentRef, Channel, ConvStatus, ConversationSummary, Priority};
use crate::message::{coerce_timestamp, DeliveryStatus, Message, MessageKind, Sender};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Wire records, as the conversations backend serves them
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAgent {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConversation {
    pub id: String,
    pub name: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: Option<u32>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub contact_id: Option<String>,
    pub identifier: Option<String>,
    pub avatar: Option<String>,
    pub sla_minutes: Option<i64>,
    pub waiting_minutes: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub assigned_agent: Option<RawAgent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub id: i64,
    pub conversation_id: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub sender: Option<String>,
    pub status: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub timestamp: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePage {
    pub messages: Vec<RawMessage>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub conversation_id: String,
    pub content: String,
    /// Reconciliation key: echoes back on the committed record so the local
    /// optimistic entry can be replaced by id.
    pub client_ref: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// The committed server record, when the backend returns one.
    pub committed: Option<RawMessage>,
}

// -----------------------------------------------------------------------------
// Normalization
// -----------------------------------------------------------------------------

/// Normalize a raw list record into the view projection. Missing or invalid
/// dates become "now"; unknown enum strings fall back to their defaults.
pub fn normalize_conversation(raw: RawConversation) -> ConversationSummary {
    let identifier = raw.identifier.as_deref().unwrap_or(raw.id.as_str());
    let searchable = format!("{} {}", raw.name, identifier).to_lowercase();

    ConversationSummary {
        last_message_at: coerce_timestamp(&[raw.last_message_at.as_deref()]),
        name: raw.name,
        last_message: raw.last_message.unwrap_or_default(),
        unread_count: raw.unread_count.unwrap_or(0),
        channel: raw.channel.as_deref().map(Channel::parse).unwrap_or(Channel::Whatsapp),
        status: raw.status.as_deref().map(ConvStatus::parse).unwrap_or(ConvStatus::Open),
        priority: raw
            .priority
            .as_deref()
            .map(Priority::parse)
            .unwrap_or(Priority::Medium),
        sla_minutes: raw.sla_minutes,
        waiting_minutes: raw.waiting_minutes,
        tags: raw.tags.unwrap_or_default(),
        assigned_agent: raw.assigned_agent.map(|a| AgentRef {
            id: a.id,
            name: a.name,
        }),
        searchable,
        id: raw.id,
    }
}

/// Normalize a raw message record. The display timestamp is the first valid
/// of the wire's date-like fields (timestamp, createdAt, updatedAt).
pub fn normalize_message(conversation_id: &str, raw: RawMessage) -> Message {
    Message {
        id: raw.id,
        conversation_id: raw
            .conversation_id
            .unwrap_or_else(|| conversation_id.to_string()),
        sender: raw.sender.as_deref().map(Sender::parse).unwrap_or(Sender::Contact),
        kind: raw.kind.as_deref().map(MessageKind::parse).unwrap_or(MessageKind::Text),
        status: raw
            .status
            .as_deref()
            .map(DeliveryStatus::parse)
            .unwrap_or(DeliveryStatus::Sent),
        content: raw.content.unwrap_or_default(),
        metadata: raw.metadata.unwrap_or_default(),
        timestamp: coerce_timestamp(&[
            raw.timestamp.as_deref(),
            raw.created_at.as_deref(),
            raw.updated_at.as_deref(),
        ]),
    }
}

// -----------------------------------------------------------------------------
// Backend capability
// -----------------------------------------------------------------------------

/// The data-source seam: the engine and poller only see this trait, so the
/// real REST backend and the deterministic sample double are interchangeable
/// (and tests script their own).
pub trait ConversationBackend: Send + Sync {
    fn list_conversations(&self) -> BoxFuture<'_, Result<Vec<RawConversation>>>;

    fn fetch_messages<'a>(
        &'a self,
        conversation_id: &'a str,
        page: u32,
        limit: u32,
    ) -> BoxFuture<'a, Result<MessagePage>>;

    fn send_message(&self, request: SendRequest) -> BoxFuture<'_, Result<SendReceipt>>;
}
