use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Instagram,
    Facebook,
    Email,
}

impl Channel {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "instagram" => Self::Instagram,
            "facebook" | "messenger" => Self::Facebook,
            "email" | "mail" => Self::Email,
            _ => Self::Whatsapp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvStatus {
    New,
    Open,
    Pending,
    Resolved,
    Closed,
}

impl ConvStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "new" => Self::New,
            "pending" | "waiting" => Self::Pending,
            "resolved" => Self::Resolved,
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" | "urgent" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Fixed sort ordering: high < medium < low.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: String,
    pub name: String,
}

/// List-row projection of a conversation, rebuilt from the raw server record
/// on every poll. Never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
    pub channel: Channel,
    pub status: ConvStatus,
    pub priority: Priority,
    pub sla_minutes: Option<i64>,
    pub waiting_minutes: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub assigned_agent: Option<AgentRef>,
    /// Lowercase name + identifier, precomputed for the text filter.
    pub searchable: String,
}

/// The held conversation list. Swapped wholesale when a poll changes the
/// membership; the revision only moves when the snapshot does, which is what
/// keeps downstream views (and their scroll offsets) stable across no-op
/// polls.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub revision: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub conversations: Vec<ConversationSummary>,
}

/// Order-independent id membership comparison. Ids are unique within a
/// snapshot, so equal length plus subset means equal sets.
pub fn same_membership(current: &[ConversationSummary], incoming: &[ConversationSummary]) -> bool {
    if current.len() != incoming.len() {
        return false;
    }
    let ids: HashSet<&str> = current.iter().map(|c| c.id.as_str()).collect();
    incoming.iter().all(|c| ids.contains(c.id.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    All,
    Unread,
    Assigned,
    Unassigned,
}

impl Tab {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "unread" => Self::Unread,
            "assigned" | "mine" => Self::Assigned,
            "unassigned" => Self::Unassigned,
            _ => Self::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Most recent activity first.
    #[default]
    Recent,
    Name,
    Priority,
}

impl SortKey {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "name" => Self::Name,
            "priority" => Self::Priority,
            _ => Self::Recent,
        }
    }
}

/// Client-side view filter. Pure; applied to the held snapshot, never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub text: Option<String>,
    pub tab: Tab,
    pub channels: HashSet<Channel>,
    pub statuses: HashSet<ConvStatus>,
    pub sort: SortKey,
}

impl ListFilter {
    fn matches(&self, conv: &ConversationSummary) -> bool {
        if let Some(text) = &self.text {
            if !conv.searchable.contains(&text.to_lowercase()) {
                return false;
            }
        }
        let tab_ok = match self.tab {
            Tab::All => true,
            Tab::Unread => conv.unread_count > 0,
            Tab::Assigned => conv.assigned_agent.is_some(),
            Tab::Unassigned => conv.assigned_agent.is_none(),
        };
        if !tab_ok {
            return false;
        }
        if !self.channels.is_empty() && !self.channels.contains(&conv.channel) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&conv.status) {
            return false;
        }
        true
    }

    pub fn apply(&self, conversations: &[ConversationSummary]) -> Vec<ConversationSummary> {
        let mut out: Vec<ConversationSummary> = conversations
            .iter()
            .filter(|c| self.matches(c))
            .cloned()
            .collect();

        match self.sort {
            SortKey::Recent => out.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at)),
            SortKey::Name => {
                out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            }
            SortKey::Priority => out.sort_by(|a, b| {
                a.priority
                    .rank()
                    .cmp(&b.priority.rank())
                    .then_with(|| b.last_message_at.cmp(&a.last_message_at))
            }),
        }

        out
    }
}
