use super::{ConversationBackend, MessagePage, RawConversation, RawMessage, SendReceipt, SendRequest};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

/// REST client for the conversations backend:
///
///   GET  {base}/api/conversations
///   GET  {base}/api/conversations/:id/messages?page=&limit=
///   POST {base}/api/conversations/:id/messages
///
/// Request and connect timeouts are set on the shared client, so a hung
/// backend releases the caller's loading guard instead of holding it forever.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl ConversationBackend for HttpBackend {
    fn list_conversations(&self) -> BoxFuture<'_, Result<Vec<RawConversation>>> {
        Box::pin(async move {
            let url = format!("{}/api/conversations", self.base_url);
            debug!("-> GET {}", url);

            let conversations = self
                .client
                .get(&url)
                .send()
                .await
                .context("Conversation list request failed")?
                .error_for_status()
                .context("Conversation list returned an error status")?
                .json::<Vec<RawConversation>>()
                .await
                .context("Failed to decode conversation list")?;

            Ok(conversations)
        })
    }

    fn fetch_messages<'a>(
        &'a self,
        conversation_id: &'a str,
        page: u32,
        limit: u32,
    ) -> BoxFuture<'a, Result<MessagePage>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/conversations/{}/messages",
                self.base_url, conversation_id
            );
            debug!("-> GET {} page={} limit={}", url, page, limit);

            let page = self
                .client
                .get(&url)
                .query(&[("page", page), ("limit", limit)])
                .send()
                .await
                .context("Message page request failed")?
                .error_for_status()
                .context("Message page returned an error status")?
                .json::<MessagePage>()
                .await
                .context("Failed to decode message page")?;

            Ok(page)
        })
    }

    fn send_message(&self, request: SendRequest) -> BoxFuture<'_, Result<SendReceipt>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/conversations/{}/messages",
                self.base_url, request.conversation_id
            );
            debug!("-> POST {} ref={}", url, request.client_ref);

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .context("Message send request failed")?
                .error_for_status()
                .context("Message send returned an error status")?;

            // Backends commonly answer with the committed record; an empty
            // body is also accepted.
            let body = response.bytes().await.context("Failed to read send reply")?;
            let committed = if body.is_empty() {
                None
            } else {
                serde_json::from_slice::<RawMessage>(&body).ok()
            };

            Ok(SendReceipt { committed })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{normalize_conversation, normalize_message};
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    /// Serve a fixture router on an ephemeral port and return its address.
    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fixture_router() -> Router {
        Router::new()
            .route(
                "/api/conversations",
                get(|| async {
                    Json(json!([
                        {
                            "id": "42",
                            "name": "Maria Silva",
                            "lastMessage": "Olá",
                            "lastMessageAt": "2024-05-10T12:00:00Z",
                            "unreadCount": 2,
                            "channel": "whatsapp",
                            "status": "open",
                            "priority": "high",
                            "identifier": "+5511999990000"
                        },
                        {
                            "id": "43",
                            "name": "João",
                            "lastMessageAt": "not a date",
                            "channel": "email"
                        }
                    ]))
                }),
            )
            .route(
                "/api/conversations/:id/messages",
                get(
                    |Path(id): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                        let page: u32 = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
                        Json(json!({
                            "messages": [
                                {
                                    "id": page * 100,
                                    "conversationId": id,
                                    "content": "oi",
                                    "type": "text",
                                    "sender": "contact",
                                    "timestamp": "2024-05-10T11:59:00Z"
                                },
                                {
                                    "id": page * 100 + 1,
                                    "content": "{\"fileName\":\"Relatório.pdf\"}",
                                    "type": "document",
                                    "sender": "user",
                                    "createdAt": "Invalid Date"
                                }
                            ],
                            "hasMore": page < 2
                        }))
                    },
                )
                .post(
                    |Path(id): Path<String>, Json(body): Json<Value>| async move {
                        Json(json!({
                            "id": 777,
                            "conversationId": id,
                            "content": body["content"],
                            "type": "text",
                            "sender": "user",
                            "status": "sent",
                            "timestamp": "2024-05-10T12:01:00Z",
                            "metadata": { "clientRef": body["clientRef"] }
                        }))
                    },
                ),
            )
    }

    #[tokio::test]
    async fn lists_and_normalizes_conversations() {
        let addr = serve(fixture_router()).await;
        let backend = HttpBackend::new(format!("http://{addr}")).unwrap();

        let raw = backend.list_conversations().await.unwrap();
        assert_eq!(raw.len(), 2);

        let normalized: Vec<_> = raw.into_iter().map(normalize_conversation).collect();
        assert_eq!(normalized[0].id, "42");
        assert_eq!(normalized[0].unread_count, 2);
        assert_eq!(normalized[0].searchable, "maria silva +5511999990000");
        assert_eq!(
            normalized[0].last_message_at,
            Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
        );

        // the broken date on the second record was coerced, not propagated
        assert!(normalized[1].last_message_at > Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn fetches_pages_with_pagination_indicator() {
        let addr = serve(fixture_router()).await;
        let backend = HttpBackend::new(format!("http://{addr}")).unwrap();

        let first = backend.fetch_messages("42", 1, 20).await.unwrap();
        assert_eq!(first.messages.len(), 2);
        assert!(first.has_more);

        let second = backend.fetch_messages("42", 2, 20).await.unwrap();
        assert!(!second.has_more);

        let msg = normalize_message("42", first.messages[0].clone());
        assert_eq!(msg.conversation_id, "42");
        assert_eq!(msg.content, "oi");
    }

    #[tokio::test]
    async fn send_returns_the_committed_record() {
        let addr = serve(fixture_router()).await;
        let backend = HttpBackend::new(format!("http://{addr}")).unwrap();

        let receipt = backend
            .send_message(SendRequest {
                conversation_id: "42".to_string(),
                content: "Olá".to_string(),
                client_ref: uuid::Uuid::new_v4(),
            })
            .await
            .unwrap();

        let committed = receipt.committed.expect("committed record");
        assert_eq!(committed.id, 777);
        assert_eq!(committed.content.as_deref(), Some("Olá"));
    }

    #[tokio::test]
    async fn backend_errors_surface_as_results() {
        let addr = serve(Router::new()).await;
        let backend = HttpBackend::new(format!("http://{addr}")).unwrap();
        assert!(backend.list_conversations().await.is_err());
    }
}
