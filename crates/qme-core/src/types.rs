use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ─── Identity ─────────────────────────────────────────────────────

/// Identity of one open page (tab) inside a storage profile.
///
/// Used to stamp storage writes and bus messages so a tab can ignore its
/// own echoes, the way a browser never delivers `storage` events or
/// `BroadcastChannel` messages back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(String);

impl TabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which queue a ticket belongs to.
///
/// `Legacy` is the original single, unnamed queue. It uses a different RPC
/// method family and a different storage key family than scoped queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueScope {
    Legacy,
    Queue(String),
}

impl QueueScope {
    pub fn queue(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.contains(':') {
            return Err(CoreError::InvalidQueueId(id));
        }
        Ok(Self::Queue(trimmed.to_string()))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy)
    }

    /// Queue id for scoped queues, `None` for the legacy queue.
    pub fn queue_id(&self) -> Option<&str> {
        match self {
            Self::Legacy => None,
            Self::Queue(id) => Some(id),
        }
    }
}

impl fmt::Display for QueueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Queue(id) => f.write_str(id),
        }
    }
}

// ─── Ticket ───────────────────────────────────────────────────────

/// Server-assigned ticket identity. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(i64);

impl TicketId {
    /// Returns `None` for ids that cannot have been issued (`<= 0`).
    pub fn new(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Guest-visible queue position. Coerced to `>= 1` on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct TicketNumber(i64);

impl TicketNumber {
    pub fn new(raw: i64) -> Self {
        Self(raw.max(1))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TicketNumber {
    fn from(raw: i64) -> Self {
        Self::new(raw)
    }
}

impl From<TicketNumber> for i64 {
    fn from(n: TicketNumber) -> Self {
        n.0
    }
}

impl From<TicketId> for TicketNumber {
    /// Legacy scheme: the display number is the id itself.
    fn from(id: TicketId) -> Self {
        Self::new(id.get())
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized result of a claim or restore call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTicket {
    pub id: TicketId,
    pub number: TicketNumber,
}

/// Guest-local view of the ticket held for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub number: TicketNumber,
    pub checked_in: bool,
}

impl Ticket {
    pub fn new(id: TicketId, number: TicketNumber) -> Self {
        Self {
            id,
            number,
            checked_in: false,
        }
    }
}

impl From<IssuedTicket> for Ticket {
    fn from(issued: IssuedTicket) -> Self {
        Self::new(issued.id, issued.number)
    }
}

// ─── Leave ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaveReason {
    User,
    NoCheckInTimeout,
    CheckedInTimeout,
}

impl LeaveReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::NoCheckInTimeout => "noCheckInTimeout",
            Self::CheckedInTimeout => "checkedInTimeout",
        }
    }

    pub fn is_automatic(self) -> bool {
        !matches!(self, Self::User)
    }
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaveReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "noCheckInTimeout" => Ok(Self::NoCheckInTimeout),
            "checkedInTimeout" => Ok(Self::CheckedInTimeout),
            _ => Err(CoreError::UnknownLeaveReason(s.to_string())),
        }
    }
}

// ─── Authority-side status ────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Waiting,
    CheckedIn,
    Left,
    Served,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::CheckedIn => "checked_in",
            Self::Left => "left",
            Self::Served => "served",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "checked_in" => Ok(Self::CheckedIn),
            "left" => Ok(Self::Left),
            "served" => Ok(Self::Served),
            _ => Err(CoreError::UnknownTicketStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: u64,
    pub waiting: u64,
    pub checked_in: u64,
    pub left: u64,
    pub served: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: TicketStatus) {
        self.total += 1;
        match status {
            TicketStatus::Waiting => self.waiting += 1,
            TicketStatus::CheckedIn => self.checked_in += 1,
            TicketStatus::Left => self.left += 1,
            TicketStatus::Served => self.served += 1,
        }
    }
}

/// Admin view of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub now_serving: i64,
    pub counts: StatusCounts,
    #[serde(rename = "lastIssued", alias = "last_issued")]
    pub last_issued: i64,
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_rejects_non_positive() {
        assert!(TicketId::new(0).is_none());
        assert!(TicketId::new(-3).is_none());
        assert_eq!(TicketId::new(7).map(TicketId::get), Some(7));
    }

    #[test]
    fn ticket_number_coerces_to_one() {
        assert_eq!(TicketNumber::new(0).get(), 1);
        assert_eq!(TicketNumber::new(-5).get(), 1);
        assert_eq!(TicketNumber::new(12).get(), 12);
    }

    #[test]
    fn ticket_number_deserialize_clamps() {
        let n: TicketNumber = serde_json::from_str("-4").expect("number");
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn leave_reason_wire_names() {
        for reason in [
            LeaveReason::User,
            LeaveReason::NoCheckInTimeout,
            LeaveReason::CheckedInTimeout,
        ] {
            let json = serde_json::to_string(&reason).expect("serialize");
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
            assert_eq!(reason.as_str().parse::<LeaveReason>(), Ok(reason));
        }
        assert!("timeout".parse::<LeaveReason>().is_err());
    }

    #[test]
    fn queue_scope_validation() {
        assert!(QueueScope::queue("").is_err());
        assert!(QueueScope::queue("a:b").is_err());
        let q = QueueScope::queue(" food ").expect("valid");
        assert_eq!(q.queue_id(), Some("food"));
        assert_eq!(QueueScope::Legacy.queue_id(), None);
    }

    #[test]
    fn status_counts_record() {
        let mut counts = StatusCounts::default();
        counts.record(TicketStatus::Waiting);
        counts.record(TicketStatus::Left);
        counts.record(TicketStatus::Left);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.left, 2);
        assert_eq!(counts.waiting, 1);
    }

    #[test]
    fn snapshot_accepts_both_last_issued_spellings() {
        let camel: QueueSnapshot = serde_json::from_value(serde_json::json!({
            "now_serving": 3,
            "counts": {"total": 0, "waiting": 0, "checked_in": 0, "left": 0, "served": 0},
            "lastIssued": 9,
        }))
        .expect("camel");
        let snake: QueueSnapshot = serde_json::from_value(serde_json::json!({
            "now_serving": 3,
            "counts": {"total": 0, "waiting": 0, "checked_in": 0, "left": 0, "served": 0},
            "last_issued": 9,
        }))
        .expect("snake");
        assert_eq!(camel, snake);
    }
}
