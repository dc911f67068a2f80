use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Contact,
    System,
    Ai,
}

impl Sender {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "user" | "agent" => Self::User,
            "system" => Self::System,
            "ai" | "bot" => Self::Ai,
            _ => Self::Contact,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Contact => "contact",
            Self::System => "system",
            Self::Ai => "ai",
        }
    }
}

/// Payload kind of a message. Providers deliver several callback shapes
/// (`message-callback`, `status-callback`, ...); they all normalize to
/// [`MessageKind::Callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Contact,
    Interactive,
    Callback,
}

impl MessageKind {
    pub fn parse(s: &str) -> Self {
        let s = s.to_lowercase();
        match s.as_str() {
            "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" | "voice" => Self::Audio,
            "document" | "file" => Self::Document,
            "location" => Self::Location,
            "contact" | "contacts" => Self::Contact,
            "interactive" => Self::Interactive,
            _ if s.contains("callback") => Self::Callback,
            _ => Self::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Interactive => "interactive",
            Self::Callback => "callback",
        }
    }
}

/// Delivery state of a message. Transitions only move forward:
/// sending -> sent -> delivered -> read, with error reachable from any
/// non-terminal state. Read and error are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Error,
}

impl DeliveryStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            "error" | "failed" => Self::Error,
            _ => Self::Sent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Error => "error",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Error => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Read | Self::Error)
    }

    /// Apply a transition, returning the resulting status. Backward and
    /// post-terminal transitions are ignored.
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() {
            return self;
        }
        if next == Self::Error {
            return Self::Error;
        }
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique within its conversation. Locally authored messages use a
    /// millisecond timestamp id until the server confirms a committed one.
    pub id: i64,
    pub conversation_id: String,
    pub sender: Sender,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    /// Raw payload; may be a JSON-encoded provider payload for non-text kinds.
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Parse the first valid date-like field, substituting the current instant
/// when every candidate is missing or invalid. An `Invalid Date` never makes
/// it past normalization.
pub fn coerce_timestamp(candidates: &[Option<&str>]) -> DateTime<Utc> {
    candidates
        .iter()
        .flatten()
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// The single ordered collection of truth for the selected conversation's
/// messages, keyed by id. Ascending by timestamp for display.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replace the whole log with a freshly loaded page.
    pub fn replace(&mut self, mut page: Vec<Message>) {
        page.sort_by_key(|m| m.timestamp);
        self.messages = page;
    }

    /// Prepend an older page in front of the held messages. The relative
    /// order of already-loaded messages is untouched.
    pub fn prepend_older(&mut self, mut page: Vec<Message>) {
        page.sort_by_key(|m| m.timestamp);
        page.extend(self.messages.drain(..));
        self.messages = page;
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Replace the entry with `id` by a server-committed record, keeping the
    /// log position. Returns the id now occupying that slot.
    pub fn reconcile(&mut self, id: i64, committed: Message) -> i64 {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(slot) => {
                let new_id = committed.id;
                *slot = committed;
                new_id
            }
            None => id,
        }
    }

    /// Advance the delivery status of one message; other messages are never
    /// touched. Returns the resulting status when the message is present and
    /// the transition changed something.
    pub fn advance_status(&mut self, id: i64, next: DeliveryStatus) -> Option<DeliveryStatus> {
        let msg = self.messages.iter_mut().find(|m| m.id == id)?;
        let advanced = msg.status.advance(next);
        if advanced == msg.status {
            return None;
        }
        msg.status = advanced;
        Some(advanced)
    }

    pub fn get(&self, id: i64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

/// Same-sender messages within this window collapse into one visual run.
const RUN_WINDOW_MINUTES: i64 = 5;

#[derive(Debug)]
pub struct SenderRun<'a> {
    pub sender: Sender,
    pub messages: Vec<&'a Message>,
}

#[derive(Debug)]
pub struct DayGroup<'a> {
    pub day: NaiveDate,
    pub runs: Vec<SenderRun<'a>>,
}

/// Derived display grouping: date separators per calendar day, same-sender
/// runs collapsed within a 5 minute window. Stateless; computed from an
/// already timestamp-ascending log.
pub fn group_for_display(messages: &[Message]) -> Vec<DayGroup<'_>> {
    let mut days: Vec<DayGroup<'_>> = Vec::new();

    for msg in messages {
        let day = msg.timestamp.date_naive();
        if days.last().map(|g| g.day) != Some(day) {
            days.push(DayGroup {
                day,
                runs: Vec::new(),
            });
        }
        let group = days.last_mut().unwrap();

        let extend_run = group.runs.last().is_some_and(|run| {
            run.sender == msg.sender
                && run.messages.last().is_some_and(|prev| {
                    msg.timestamp - prev.timestamp <= Duration::minutes(RUN_WINDOW_MINUTES)
                })
        });

        if extend_run {
            group.runs.last_mut().unwrap().messages.push(msg);
        } else {
            group.runs.push(SenderRun {
                sender: msg.sender,
                messages: vec![msg],
            });
        }
    }

    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: i64, sender: Sender, at: DateTime<Utc>) -> Message {
        Message {
            id,
            conversation_id: "c1".to_string(),
            sender,
            kind: MessageKind::Text,
            status: DeliveryStatus::Sent,
            content: format!("m{}", id),
            metadata: HashMap::new(),
            timestamp: at,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap()
    }

    #[test]
    fn coerce_accepts_valid_rfc3339() {
        let ts = coerce_timestamp(&[Some("2024-05-10T12:00:00Z")]);
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
    }

    #[test]
    fn coerce_picks_first_valid_candidate() {
        let ts = coerce_timestamp(&[
            Some("not a date"),
            None,
            Some("2024-05-10T12:00:00Z"),
        ]);
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
    }

    #[test]
    fn coerce_substitutes_now_for_invalid_input() {
        for raw in [&[Some("garbage")][..], &[None][..], &[][..]] {
            let before = Utc::now();
            let ts = coerce_timestamp(raw);
            let after = Utc::now();
            assert!(ts >= before && ts <= after, "got {ts} for {raw:?}");
        }
    }

    #[test]
    fn delivery_status_never_moves_backward() {
        use DeliveryStatus::*;
        assert_eq!(Sending.advance(Sent), Sent);
        assert_eq!(Sent.advance(Delivered), Delivered);
        assert_eq!(Delivered.advance(Read), Read);
        assert_eq!(Read.advance(Sent), Read);
        assert_eq!(Delivered.advance(Sending), Delivered);
        assert_eq!(Sent.advance(Sent), Sent);
    }

    #[test]
    fn delivery_error_is_terminal_and_reachable_in_flight() {
        use DeliveryStatus::*;
        assert_eq!(Sending.advance(Error), Error);
        assert_eq!(Delivered.advance(Error), Error);
        assert_eq!(Error.advance(Read), Error);
        assert_eq!(Read.advance(Error), Read);
    }

    #[test]
    fn prepend_older_preserves_relative_order() {
        let mut log = MessageLog::default();
        log.replace(vec![
            msg(21, Sender::Contact, at(10, 0)),
            msg(22, Sender::User, at(10, 1)),
        ]);
        log.prepend_older(vec![
            msg(11, Sender::Contact, at(9, 0)),
            msg(12, Sender::User, at(9, 1)),
        ]);

        let ids: Vec<i64> = log.as_slice().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![11, 12, 21, 22]);
    }

    #[test]
    fn advance_status_targets_only_the_given_id() {
        let mut log = MessageLog::default();
        let mut sending = msg(1, Sender::User, at(10, 0));
        sending.status = DeliveryStatus::Sending;
        log.push(sending);
        log.push(msg(2, Sender::Contact, at(10, 1)));

        assert_eq!(
            log.advance_status(1, DeliveryStatus::Sent),
            Some(DeliveryStatus::Sent)
        );
        assert_eq!(log.get(2).unwrap().status, DeliveryStatus::Sent);
        assert_eq!(log.advance_status(99, DeliveryStatus::Read), None);
    }

    #[test]
    fn reconcile_swaps_the_committed_record_in_place() {
        let mut log = MessageLog::default();
        log.push(msg(1715000000000, Sender::User, at(10, 0)));
        log.push(msg(2, Sender::Contact, at(10, 1)));

        let committed = msg(501, Sender::User, at(10, 0));
        let id = log.reconcile(1715000000000, committed);

        assert_eq!(id, 501);
        let ids: Vec<i64> = log.as_slice().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![501, 2]);
    }

    #[test]
    fn grouping_splits_days_and_collapses_runs() {
        let messages = vec![
            msg(1, Sender::Contact, at(9, 0)),
            msg(2, Sender::Contact, at(9, 3)),
            msg(3, Sender::Contact, at(9, 20)),
            msg(4, Sender::User, at(9, 21)),
            msg(
                5,
                Sender::User,
                Utc.with_ymd_and_hms(2024, 5, 11, 8, 0, 0).unwrap(),
            ),
        ];

        let groups = group_for_display(&messages);
        assert_eq!(groups.len(), 2);

        let first = &groups[0];
        assert_eq!(first.day, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        // contact run of two, contact run of one (gap > 5 min), user run
        assert_eq!(first.runs.len(), 3);
        assert_eq!(first.runs[0].messages.len(), 2);
        assert_eq!(first.runs[1].messages.len(), 1);
        assert_eq!(first.runs[2].sender, Sender::User);

        assert_eq!(groups[1].runs.len(), 1);
    }
}
