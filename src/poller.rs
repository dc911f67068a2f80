use crate::backend::normalize_conversation;
use crate::bus::Event;
use crate::conversation::ConversationSummary;
use crate::inbox::Inbox;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Keeps the conversation snapshot eventually consistent with the backend by
/// polling on a fixed interval. Swaps go through `Inbox::apply_poll`, so a
/// poll that changes nothing never disturbs downstream views.
pub struct ListPoller {
    inbox: Arc<Inbox>,
    interval: Duration,
}

impl ListPoller {
    pub fn new(inbox: Arc<Inbox>, interval: Duration) -> Self {
        Self { inbox, interval }
    }

    /// Poll forever. The first tick fires immediately, matching load-on-start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                // previous snapshot stays on display; a failed poll is never
                // surfaced as a blocking error state
                warn!("conversation poll failed: {:#}", e);
            }
        }
    }

    /// One fetch-normalize-compare-swap cycle.
    pub async fn poll_once(&self) -> Result<()> {
        let raw = self.inbox.backend().list_conversations().await?;
        let normalized: Vec<ConversationSummary> =
            raw.into_iter().map(normalize_conversation).collect();

        let Some((revision, count)) = self.inbox.apply_poll(normalized.clone()) else {
            debug!("conversation membership unchanged, snapshot kept");
            return Ok(());
        };

        for conv in &normalized {
            if let Err(e) = self.inbox.store().upsert_conversation(conv).await {
                warn!("failed to cache conversation {}: {:#}", conv.id, e);
            }
        }

        self.inbox
            .bus()
            .publish(Event::ConversationListUpdated { revision, count });
        debug!("conversation snapshot swapped: revision={} count={}", revision, count);

        Ok(())
    }
}
