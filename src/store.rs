use crate::conversation::{Channel, ConvStatus, ConversationSummary, Priority};
use crate::message::{DeliveryStatus, Message, MessageKind, Sender};
use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Row, SqlitePool,
};
use std::{collections::HashMap, path::Path, str::FromStr};

/// Local history cache. Conversations are upserted on every snapshot swap,
/// messages on page loads and sends, so history survives backend outages and
/// daemon restarts.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection: every pooled
    /// `:memory:` connection would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                last_message TEXT NOT NULL DEFAULT '',
                last_message_at DATETIME NOT NULL,
                unread_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                id INTEGER NOT NULL,
                sender TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT,
                timestamp DATETIME NOT NULL,
                PRIMARY KEY (conversation_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conv_timestamp ON messages(conversation_id, timestamp DESC);
            "#
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Upsert one conversation row from a snapshot.
    pub async fn upsert_conversation(&self, conv: &ConversationSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, name, channel, status, priority, last_message, last_message_at, unread_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                channel = excluded.channel,
                status = excluded.status,
                priority = excluded.priority,
                last_message = excluded.last_message,
                last_message_at = excluded.last_message_at,
                unread_count = excluded.unread_count
            "#,
        )
        .bind(&conv.id)
        .bind(&conv.name)
        .bind(conv.channel.as_str())
        .bind(conv.status.as_str())
        .bind(conv.priority.as_str())
        .bind(&conv.last_message)
        .bind(conv.last_message_at)
        .bind(conv.unread_count)
        .execute(&self.pool)
        .await
        .context("Failed to upsert conversation")?;

        Ok(())
    }

    /// Save a message, replacing any earlier row with the same id (server
    /// confirmations and delivery transitions rewrite the row).
    pub async fn save_message(&self, msg: &Message) -> Result<()> {
        let metadata_json = if msg.metadata.is_empty() {
            None
        } else {
            serde_json::to_string(&msg.metadata).ok()
        };

        sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, id, sender, kind, status, content, metadata_json, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(conversation_id, id) DO UPDATE SET
                sender = excluded.sender,
                kind = excluded.kind,
                status = excluded.status,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&msg.conversation_id)
        .bind(msg.id)
        .bind(msg.sender.as_str())
        .bind(msg.kind.as_str())
        .bind(msg.status.as_str())
        .bind(&msg.content)
        .bind(metadata_json)
        .bind(msg.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to save message")?;

        Ok(())
    }

    /// Advance the persisted delivery status of one message.
    pub async fn update_message_status(
        &self,
        conversation_id: &str,
        id: i64,
        status: DeliveryStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messages SET status = ? WHERE conversation_id = ? AND id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(conversation_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update message status")?;

        Ok(())
    }

    /// Drop one message row (used when a committed record replaces the local
    /// echo under a different id).
    pub async fn delete_message(&self, conversation_id: &str, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM messages WHERE conversation_id = ? AND id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to delete message")?;

        Ok(())
    }

    /// Retrieve cached history for a conversation.
    /// Returns messages ordered by timestamp ascending (oldest to newest).
    pub async fn get_history(&self, conversation_id: &str, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, id, sender, kind, status, content, metadata_json, timestamp
            FROM messages
            WHERE conversation_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch message history")?;

        let mut messages = Vec::with_capacity(rows.len());

        for row in rows {
            let sender: String = row.try_get("sender")?;
            let kind: String = row.try_get("kind")?;
            let status: String = row.try_get("status")?;
            let metadata_json: Option<String> = row.try_get("metadata_json")?;
            let metadata: HashMap<String, String> = metadata_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();

            messages.push(Message {
                conversation_id: row.try_get("conversation_id")?,
                id: row.try_get("id")?,
                sender: Sender::parse(&sender),
                kind: MessageKind::parse(&kind),
                status: DeliveryStatus::parse(&status),
                content: row.try_get("content")?,
                metadata,
                timestamp: row.try_get("timestamp")?,
            });
        }

        // Return in chronological order (oldest -> newest)
        messages.reverse();

        Ok(messages)
    }

    /// Cached conversation rows, most recent activity first.
    pub async fn get_conversations(&self) -> Result<Vec<(String, String, Channel, ConvStatus, Priority)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, channel, status, priority
            FROM conversations
            ORDER BY last_message_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch cached conversations")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let channel: String = row.try_get("channel")?;
            let status: String = row.try_get("status")?;
            let priority: String = row.try_get("priority")?;
            out.push((
                row.try_get("id")?,
                row.try_get("name")?,
                Channel::parse(&channel),
                ConvStatus::parse(&status),
                Priority::parse(&priority),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, at_minute: u32) -> Message {
        Message {
            id,
            conversation_id: "42".to_string(),
            sender: Sender::User,
            kind: MessageKind::Text,
            status: DeliveryStatus::Sending,
            content: format!("m{id}"),
            metadata: HashMap::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 10, 12, at_minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn history_round_trips_in_chronological_order() {
        let store = Store::in_memory().await.unwrap();
        store.save_message(&message(2, 5)).await.unwrap();
        store.save_message(&message(1, 1)).await.unwrap();

        let history = store.get_history("42", 50).await.unwrap();
        let ids: Vec<i64> = history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(history[0].sender, Sender::User);
    }

    #[tokio::test]
    async fn saving_twice_replaces_the_row() {
        let store = Store::in_memory().await.unwrap();
        let mut msg = message(1, 0);
        store.save_message(&msg).await.unwrap();

        msg.status = DeliveryStatus::Sent;
        msg.content = "edited".to_string();
        store.save_message(&msg).await.unwrap();

        let history = store.get_history("42", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DeliveryStatus::Sent);
        assert_eq!(history[0].content, "edited");
    }

    #[tokio::test]
    async fn status_update_targets_one_row() {
        let store = Store::in_memory().await.unwrap();
        store.save_message(&message(1, 0)).await.unwrap();
        store.save_message(&message(2, 1)).await.unwrap();

        store
            .update_message_status("42", 1, DeliveryStatus::Read)
            .await
            .unwrap();

        let history = store.get_history("42", 10).await.unwrap();
        assert_eq!(history[0].status, DeliveryStatus::Read);
        assert_eq!(history[1].status, DeliveryStatus::Sending);
    }

    #[tokio::test]
    async fn conversation_upsert_is_idempotent_by_id() {
        let store = Store::in_memory().await.unwrap();
        let mut conv = crate::conversation::ConversationSummary {
            id: "42".to_string(),
            name: "Maria".to_string(),
            last_message: "Olá".to_string(),
            last_message_at: Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
            unread_count: 1,
            channel: Channel::Whatsapp,
            status: ConvStatus::Open,
            priority: Priority::High,
            sla_minutes: None,
            waiting_minutes: None,
            tags: Vec::new(),
            assigned_agent: None,
            searchable: "maria 42".to_string(),
        };
        store.upsert_conversation(&conv).await.unwrap();
        conv.name = "Maria Silva".to_string();
        store.upsert_conversation(&conv).await.unwrap();

        let cached = store.get_conversations().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].1, "Maria Silva");
    }
}
