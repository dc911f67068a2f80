use super::{ConversationBackend, MessagePage, RawConversation, RawMessage, SendReceipt, SendRequest};
use anyhow::Result;
use chrono::{Duration, Utc};
use futures::future::BoxFuture;

/// Deterministic demo data source. This is the development/demo dataset the
/// original substituted on fetch failure; here it is never a fallback path —
/// it has to be selected explicitly (config flag or tests).
pub struct SampleBackend;

/// Messages per synthetic page.
const PAGE_SIZE: usize = 15;
/// The synthetic history is capped to a small fixed number of pages.
const MAX_PAGES: u32 = 3;

impl SampleBackend {
    pub fn new() -> Self {
        Self
    }

    fn conversation(id: &str, name: &str, channel: &str, preview: &str, minutes_ago: i64) -> RawConversation {
        RawConversation {
            id: id.to_string(),
            name: name.to_string(),
            last_message: Some(preview.to_string()),
            last_message_at: Some((Utc::now() - Duration::minutes(minutes_ago)).to_rfc3339()),
            unread_count: Some(if minutes_ago < 10 { 2 } else { 0 }),
            channel: Some(channel.to_string()),
            status: Some("open".to_string()),
            priority: Some("medium".to_string()),
            ..Default::default()
        }
    }
}

impl ConversationBackend for SampleBackend {
    fn list_conversations(&self) -> BoxFuture<'_, Result<Vec<RawConversation>>> {
        Box::pin(async move {
            Ok(vec![
                Self::conversation("demo-1", "Maria Silva", "whatsapp", "Olá, tudo bem?", 5),
                Self::conversation("demo-2", "João Pereira", "instagram", "Qual o prazo de entrega?", 42),
                Self::conversation("demo-3", "Ana Costa", "email", "Segue o relatório em anexo", 180),
                Self::conversation("demo-4", "Carlos Lima", "facebook", "Obrigado!", 600),
            ])
        })
    }

    fn fetch_messages<'a>(
        &'a self,
        conversation_id: &'a str,
        page: u32,
        _limit: u32,
    ) -> BoxFuture<'a, Result<MessagePage>> {
        Box::pin(async move {
            let page = page.max(1);
            let now = Utc::now();
            // each page reaches one hour further back
            let page_offset = Duration::hours(i64::from(page) - 1);

            let mut messages: Vec<RawMessage> = (0..PAGE_SIZE)
                .map(|i| {
                    let sender = if i % 2 == 0 { "contact" } else { "user" };
                    let at = now - page_offset - Duration::minutes((PAGE_SIZE - i) as i64);
                    RawMessage {
                        id: i64::from(page) * 1000 + i as i64,
                        conversation_id: Some(conversation_id.to_string()),
                        content: Some(format!("Mensagem de exemplo {}", i + 1)),
                        kind: Some("text".to_string()),
                        sender: Some(sender.to_string()),
                        status: Some("read".to_string()),
                        timestamp: Some(at.to_rfc3339()),
                        ..Default::default()
                    }
                })
                .collect();

            // three fixed illustrative payloads, newest page only
            if page == 1 {
                let extras = [
                    (
                        "image",
                        r#"{"caption":"Foto do produto","url":"https://example.com/p.jpg"}"#,
                        "contact",
                    ),
                    ("document", r#"{"fileName":"Relatório.pdf"}"#, "user"),
                    (
                        "message-callback",
                        r#"{"message":"Atendimento transferido para o time de vendas"}"#,
                        "system",
                    ),
                ];
                for (i, (kind, content, sender)) in extras.iter().enumerate() {
                    messages.push(RawMessage {
                        id: 1000 + (PAGE_SIZE + i) as i64,
                        conversation_id: Some(conversation_id.to_string()),
                        content: Some((*content).to_string()),
                        kind: Some((*kind).to_string()),
                        sender: Some((*sender).to_string()),
                        status: Some("read".to_string()),
                        timestamp: Some((now - Duration::seconds(3 - i as i64)).to_rfc3339()),
                        ..Default::default()
                    });
                }
            }

            Ok(MessagePage {
                messages,
                has_more: page < MAX_PAGES,
            })
        })
    }

    fn send_message(&self, _request: SendRequest) -> BoxFuture<'_, Result<SendReceipt>> {
        // accepted locally; there is no committed server record to reconcile
        Box::pin(async move { Ok(SendReceipt { committed: None }) })
    }
}
