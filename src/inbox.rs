use crate::backend::{normalize_message, ConversationBackend, SendReceipt};
use crate::bus::{Event, EventBus};
use crate::conversation::{same_membership, ConversationSummary, ListFilter, Snapshot};
use crate::delivery::DeliveryTuning;
use crate::message::{DeliveryStatus, Message, MessageKind, MessageLog, Sender};
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Page size requested from the backend.
pub const PAGE_LIMIT: u32 = 20;

/// Per-selection message state. `loading` carries the generation of the
/// in-flight load; `generation` bumps on every selection so a late response
/// for a previously selected conversation is recognizable and dropped.
struct ThreadState {
    selected: Option<String>,
    generation: u64,
    loading: Option<u64>,
    page: u32,
    has_more: bool,
    log: MessageLog,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            selected: None,
            generation: 0,
            loading: None,
            page: 1,
            has_more: false,
            log: MessageLog::default(),
        }
    }
}

/// The inbox engine: single source of truth for the conversation snapshot,
/// the selected conversation and its message log. Handed around as an `Arc`,
/// state behind scoped std mutex locks; backend calls happen outside them.
pub struct Inbox {
    backend: Arc<dyn ConversationBackend>,
    bus: Arc<EventBus>,
    store: Store,
    tuning: DeliveryTuning,
    snapshot: Mutex<Snapshot>,
    thread: Mutex<ThreadState>,
}

impl Inbox {
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        bus: Arc<EventBus>,
        store: Store,
        tuning: DeliveryTuning,
    ) -> Self {
        Self {
            backend,
            bus,
            store,
            tuning,
            snapshot: Mutex::new(Snapshot::default()),
            thread: Mutex::new(ThreadState::new()),
        }
    }

    pub(crate) fn backend(&self) -> Arc<dyn ConversationBackend> {
        self.backend.clone()
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Conversation list
    // -------------------------------------------------------------------------

    /// Apply a freshly normalized poll result. Identical id membership means
    /// the new snapshot is discarded and the revision stays put — downstream
    /// views keep their scroll position. Returns the new revision on a swap.
    pub fn apply_poll(&self, incoming: Vec<ConversationSummary>) -> Option<(u64, usize)> {
        let mut snapshot = self.snapshot.lock().unwrap();
        if snapshot.fetched_at.is_some() && same_membership(&snapshot.conversations, &incoming) {
            snapshot.fetched_at = Some(Utc::now());
            return None;
        }
        snapshot.revision += 1;
        snapshot.fetched_at = Some(Utc::now());
        snapshot.conversations = incoming;
        Some((snapshot.revision, snapshot.conversations.len()))
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.lock().unwrap().revision
    }

    /// Filtered, sorted view over the held snapshot.
    pub fn list(&self, filter: &ListFilter) -> Vec<ConversationSummary> {
        let snapshot = self.snapshot.lock().unwrap();
        filter.apply(&snapshot.conversations)
    }

    // -------------------------------------------------------------------------
    // Message loading
    // -------------------------------------------------------------------------

    pub fn selected(&self) -> Option<String> {
        self.thread.lock().unwrap().selected.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.thread.lock().unwrap().log.to_vec()
    }

    pub fn has_more(&self) -> bool {
        self.thread.lock().unwrap().has_more
    }

    pub fn current_page(&self) -> u32 {
        self.thread.lock().unwrap().page
    }

    /// Select a conversation and load its first page. Selecting the already
    /// selected conversation is a no-op; switching clears the log, bumps the
    /// generation (so in-flight loads for the old selection get dropped) and
    /// does a replacing load.
    pub async fn select(&self, conversation_id: &str) -> Result<()> {
        {
            let mut thread = self.thread.lock().unwrap();
            if thread.selected.as_deref() == Some(conversation_id) {
                return Ok(());
            }
            thread.selected = Some(conversation_id.to_string());
            thread.generation += 1;
            thread.page = 1;
            thread.has_more = false;
            thread.log.clear();
        }
        self.load_page(1, false).await
    }

    /// Load one older page. No-op while a load is in flight, when the backend
    /// reported no more pages, or when nothing is selected.
    pub async fn load_more(&self) -> Result<()> {
        let next_page = {
            let thread = self.thread.lock().unwrap();
            if thread.loading.is_some() || !thread.has_more || thread.selected.is_none() {
                return Ok(());
            }
            thread.page + 1
        };
        self.load_page(next_page, true).await
    }

    /// Fetch and apply one message page. `append` prepends the page as older
    /// history; otherwise the log is replaced and consumers get a jump-to-
    /// newest hint. A response that comes back after the selection moved on
    /// is discarded.
    async fn load_page(&self, page: u32, append: bool) -> Result<()> {
        let (conversation_id, generation) = {
            let mut thread = self.thread.lock().unwrap();
            let Some(id) = thread.selected.clone() else {
                return Ok(());
            };
            thread.loading = Some(thread.generation);
            (id, thread.generation)
        };

        let result = self
            .backend
            .fetch_messages(&conversation_id, page, PAGE_LIMIT)
            .await;

        let persisted = {
            let mut thread = self.thread.lock().unwrap();
            if thread.loading == Some(generation) {
                thread.loading = None;
            }
            if thread.generation != generation {
                debug!(
                    "discarding stale page {} for conversation {}",
                    page, conversation_id
                );
                return Ok(());
            }

            match result {
                Ok(wire) => {
                    let normalized: Vec<Message> = wire
                        .messages
                        .into_iter()
                        .map(|raw| normalize_message(&conversation_id, raw))
                        .collect();
                    let persisted = normalized.clone();
                    if append {
                        thread.log.prepend_older(normalized);
                    } else {
                        thread.log.replace(normalized);
                    }
                    thread.page = page;
                    thread.has_more = wire.has_more;
                    persisted
                }
                Err(e) => {
                    // held messages stay on screen; a fetch failure is never a
                    // blocking error state
                    warn!(
                        "message page load failed for {}: {:#}",
                        conversation_id, e
                    );
                    return Ok(());
                }
            }
        };

        for msg in &persisted {
            if let Err(e) = self.store.save_message(msg).await {
                warn!("failed to cache message {}: {:#}", msg.id, e);
            }
        }

        if !append {
            self.bus.publish(Event::ScrollToNewest { conversation_id });
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Optimistic send
    // -------------------------------------------------------------------------

    /// Append a locally constructed message in `sending` state and kick off
    /// its delivery chain. Returns the local message id, or `None` when the
    /// text trims to nothing or no conversation is selected.
    pub async fn send_message(self: &Arc<Self>, text: &str) -> Result<Option<i64>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let message = {
            let mut thread = self.thread.lock().unwrap();
            let Some(conversation_id) = thread.selected.clone() else {
                return Ok(None);
            };

            let mut id = Utc::now().timestamp_millis();
            while thread.log.contains(id) {
                id += 1;
            }

            let message = Message {
                id,
                conversation_id,
                sender: Sender::User,
                kind: MessageKind::Text,
                status: DeliveryStatus::Sending,
                content: text.to_string(),
                metadata: HashMap::new(),
                timestamp: Utc::now(),
            };
            thread.log.push(message.clone());
            message
        };

        if let Err(e) = self.store.save_message(&message).await {
            warn!("failed to cache outgoing message {}: {:#}", message.id, e);
        }

        self.bus.publish(Event::MessageAppended(message.clone()));
        self.bus.publish(Event::ScrollToNewest {
            conversation_id: message.conversation_id.clone(),
        });

        let id = message.id;
        crate::delivery::spawn_chain(self.clone(), message, self.tuning);
        Ok(Some(id))
    }

    // -------------------------------------------------------------------------
    // Delivery bookkeeping (driven by the chain in delivery.rs)
    // -------------------------------------------------------------------------

    /// Acknowledge the send: advance to `sent`, or reconcile the local entry
    /// with the server-committed record when one came back. Returns the id
    /// the rest of the chain should target.
    pub(crate) async fn mark_sent(
        &self,
        conversation_id: &str,
        local_id: i64,
        receipt: SendReceipt,
    ) -> i64 {
        let committed = receipt.committed.map(|raw| {
            let mut msg = normalize_message(conversation_id, raw);
            msg.status = DeliveryStatus::Sent.advance(msg.status);
            msg
        });

        let (id, status, replacement) = {
            let mut thread = self.thread.lock().unwrap();
            match committed {
                Some(msg) => {
                    let id = thread.log.reconcile(local_id, msg.clone());
                    (id, msg.status, Some(msg))
                }
                None => {
                    thread.log.advance_status(local_id, DeliveryStatus::Sent);
                    (local_id, DeliveryStatus::Sent, None)
                }
            }
        };

        match replacement {
            Some(msg) => {
                if msg.id != local_id {
                    if let Err(e) = self.store.delete_message(conversation_id, local_id).await {
                        warn!("failed to drop local echo {}: {:#}", local_id, e);
                    }
                }
                if let Err(e) = self.store.save_message(&msg).await {
                    warn!("failed to cache committed message {}: {:#}", msg.id, e);
                }
            }
            None => {
                if let Err(e) = self
                    .store
                    .update_message_status(conversation_id, id, status)
                    .await
                {
                    warn!("failed to persist status for {}: {:#}", id, e);
                }
            }
        }

        self.bus.publish(Event::DeliveryStatusChanged {
            conversation_id: conversation_id.to_string(),
            message_id: id,
            status,
        });

        id
    }

    /// Apply one delivery transition. Targets exactly one message; if the
    /// conversation was switched away in the meantime the log is untouched
    /// but the cached row and subscribers still see the transition.
    pub(crate) async fn apply_delivery(
        &self,
        conversation_id: &str,
        id: i64,
        next: DeliveryStatus,
    ) {
        let status = {
            let mut thread = self.thread.lock().unwrap();
            if thread.log.contains(id) {
                thread.log.advance_status(id, next)
            } else {
                Some(next)
            }
        };

        let Some(status) = status else {
            return;
        };

        if let Err(e) = self
            .store
            .update_message_status(conversation_id, id, status)
            .await
        {
            warn!("failed to persist status for {}: {:#}", id, e);
        }

        self.bus.publish(Event::DeliveryStatusChanged {
            conversation_id: conversation_id.to_string(),
            message_id: id,
            status,
        });
    }
}
