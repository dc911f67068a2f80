use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::EventBus;
use crate::content::extract_content;
use crate::conversation::{Channel, ConvStatus, ListFilter, SortKey, Tab};
use crate::inbox::Inbox;
use crate::message::Message;

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    pub inbox: Arc<Inbox>,
    pub bus: Arc<EventBus>,
}

/// The daemon's local surface. Serves the held inbox state (never proxies the
/// backend directly) and streams bus events over SSE so consumers subscribe
/// to changes instead of polling.
pub fn router(inbox: Arc<Inbox>, bus: Arc<EventBus>) -> Router {
    let state = Arc::new(AppState { inbox, bus });

    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/select", post(select_conversation))
        .route(
            "/conversations/:id/messages",
            get(get_messages).post(send_message),
        )
        .route("/events", get(events_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    q: Option<String>,
    tab: Option<String>,
    /// Comma-separated channel names
    channel: Option<String>,
    /// Comma-separated status names
    status: Option<String>,
    sort: Option<String>,
}

impl ListParams {
    fn into_filter(self) -> ListFilter {
        ListFilter {
            text: self.q.filter(|q| !q.trim().is_empty()),
            tab: self.tab.as_deref().map(Tab::parse).unwrap_or_default(),
            channels: self
                .channel
                .as_deref()
                .map(|s| s.split(',').map(str::trim).map(Channel::parse).collect())
                .unwrap_or_default(),
            statuses: self
                .status
                .as_deref()
                .map(|s| s.split(',').map(str::trim).map(ConvStatus::parse).collect())
                .unwrap_or_default(),
            sort: self.sort.as_deref().map(SortKey::parse).unwrap_or_default(),
        }
    }
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let filter = params.into_filter();
    Json(json!({
        "revision": state.inbox.revision(),
        "conversations": state.inbox.list(&filter),
    }))
}

async fn select_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.inbox.select(&id).await {
        Ok(()) => Json(json!({ "selected": id })).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct MessagesParams {
    #[serde(default)]
    limit: Option<i64>,
}

/// Serialize messages with their derived display text attached.
fn render_messages(messages: Vec<Message>) -> Vec<serde_json::Value> {
    messages
        .into_iter()
        .map(|m| {
            let display = extract_content(m.kind, &m.content);
            let mut value = serde_json::to_value(&m).unwrap_or(serde_json::Value::Null);
            if let serde_json::Value::Object(ref mut map) = value {
                map.insert("display".to_string(), serde_json::Value::String(display));
            }
            value
        })
        .collect()
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<MessagesParams>,
) -> impl IntoResponse {
    // the selected conversation is served live (optimistic statuses included);
    // anything else comes from the cache
    if state.inbox.selected().as_deref() == Some(id.as_str()) {
        return Json(json!({
            "messages": render_messages(state.inbox.messages()),
            "hasMore": state.inbox.has_more(),
            "page": state.inbox.current_page(),
        }))
        .into_response();
    }

    match state
        .inbox
        .store()
        .get_history(&id, params.limit.unwrap_or(50))
        .await
    {
        Ok(messages) => {
            Json(json!({ "messages": render_messages(messages), "hasMore": false }))
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SendBody {
    content: String,
}

#[axum::debug_handler]
async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> impl IntoResponse {
    // sending targets the selected conversation; select it first if needed
    if state.inbox.selected().as_deref() != Some(id.as_str()) {
        if let Err(e) = state.inbox.select(&id).await {
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    }

    match state.inbox.send_message(&body.content).await {
        Ok(Some(message_id)) => Json(json!({ "id": message_id })).into_response(),
        Ok(None) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "message is empty" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    info!("New SSE subscriber");

    let mut rx = state.bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(payload) => yield Ok(SseEvent::default().data(payload)),
                        Err(e) => {
                            tracing::error!("failed to serialize event: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("SSE subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sample::SampleBackend;
    use crate::delivery::DeliveryTuning;
    use crate::poller::ListPoller;
    use crate::store::Store;
    use std::time::Duration;

    async fn spin_daemon() -> (String, Arc<Inbox>) {
        let bus = Arc::new(EventBus::new());
        let inbox = Arc::new(Inbox::new(
            Arc::new(SampleBackend::new()),
            bus.clone(),
            Store::in_memory().await.unwrap(),
            DeliveryTuning {
                delivered_after: Duration::from_millis(10),
                read_after: Duration::from_millis(10),
            },
        ));

        ListPoller::new(inbox.clone(), Duration::from_secs(60))
            .poll_once()
            .await
            .unwrap();

        let app = router(inbox.clone(), bus);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), inbox)
    }

    #[tokio::test]
    async fn surface_serves_list_messages_and_send() {
        let (base, inbox) = spin_daemon().await;
        let client = reqwest::Client::new();

        let list: serde_json::Value = client
            .get(format!("{base}/conversations?tab=all&sort=name"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["conversations"].as_array().unwrap().len(), 4);

        let selected: serde_json::Value = client
            .post(format!("{base}/conversations/demo-1/select"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(selected["selected"], "demo-1");

        let messages: serde_json::Value = client
            .get(format!("{base}/conversations/demo-1/messages"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let rows = messages["messages"].as_array().unwrap();
        assert_eq!(rows.len(), 18);
        assert_eq!(messages["hasMore"], true);

        // non-text payloads come back with derived display text
        let document = rows
            .iter()
            .find(|m| m["kind"] == "document")
            .expect("document row");
        assert_eq!(document["display"], "Documento: Relatório.pdf");

        let sent: serde_json::Value = client
            .post(format!("{base}/conversations/demo-1/messages"))
            .json(&serde_json::json!({ "content": "Olá" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(sent["id"].as_i64().is_some());
        assert_eq!(inbox.messages().last().unwrap().content, "Olá");
    }

    #[tokio::test]
    async fn blank_send_is_rejected() {
        let (base, _inbox) = spin_daemon().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/conversations/demo-1/messages"))
            .json(&serde_json::json!({ "content": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn channel_filter_narrows_the_list() {
        let (base, _inbox) = spin_daemon().await;
        let client = reqwest::Client::new();

        let list: serde_json::Value = client
            .get(format!("{base}/conversations?channel=email"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let conversations = list["conversations"].as_array().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0]["name"], "Ana Costa");
    }
}
