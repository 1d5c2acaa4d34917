//! Storage key layout.
//!
//! Scoped queues use `qme:ticket:{q}`, `qme:ticketNum:{q}` and
//! `qme:checkedIn:{q}:{ticket_id}`. The legacy single queue uses
//! `guest:ticketId`, `guest:ticketNum` and `guest:checkedIn:{ticket_id}`.
//! Check-in flags are keyed by ticket id so a flag left behind by an old
//! ticket never applies to a new one.

use qme_core::{QueueScope, TicketId};

const SCOPED_TICKET_PREFIX: &str = "qme:ticket:";
const SCOPED_NUMBER_PREFIX: &str = "qme:ticketNum:";
const SCOPED_CHECKED_IN_PREFIX: &str = "qme:checkedIn:";

const LEGACY_TICKET_KEY: &str = "guest:ticketId";
const LEGACY_NUMBER_KEY: &str = "guest:ticketNum";
const LEGACY_CHECKED_IN_PREFIX: &str = "guest:checkedIn:";

/// Unscoped key written by the oldest clients, in local or session storage.
pub const LEGACY_UNSCOPED_KEY: &str = "guest2:ticket";

/// Tab-scoped session entries (legacy flow only).
pub const SESSION_TICKET_KEY: &str = "guest:session:ticketId";
pub const SESSION_CHECKED_IN_KEY: &str = "guest:session:checkedIn";

pub fn ticket_key(scope: &QueueScope) -> String {
    match scope {
        QueueScope::Legacy => LEGACY_TICKET_KEY.to_string(),
        QueueScope::Queue(q) => format!("{SCOPED_TICKET_PREFIX}{q}"),
    }
}

pub fn number_key(scope: &QueueScope) -> String {
    match scope {
        QueueScope::Legacy => LEGACY_NUMBER_KEY.to_string(),
        QueueScope::Queue(q) => format!("{SCOPED_NUMBER_PREFIX}{q}"),
    }
}

pub fn checked_in_key(scope: &QueueScope, id: TicketId) -> String {
    match scope {
        QueueScope::Legacy => format!("{LEGACY_CHECKED_IN_PREFIX}{id}"),
        QueueScope::Queue(q) => format!("{SCOPED_CHECKED_IN_PREFIX}{q}:{id}"),
    }
}

/// Queue id encoded in a scoped ticket-id key.
pub fn queue_of_ticket_key(key: &str) -> Option<&str> {
    key.strip_prefix(SCOPED_TICKET_PREFIX)
        .filter(|q| !q.is_empty())
}

/// What a changed key means for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    TicketId,
    TicketNumber,
    CheckedIn(TicketId),
}

/// Classify `key` relative to `scope`; `None` for unrelated keys.
pub fn classify(scope: &QueueScope, key: &str) -> Option<KeyKind> {
    if key == ticket_key(scope) {
        return Some(KeyKind::TicketId);
    }
    if key == number_key(scope) {
        return Some(KeyKind::TicketNumber);
    }
    let prefix = match scope {
        QueueScope::Legacy => LEGACY_CHECKED_IN_PREFIX.to_string(),
        QueueScope::Queue(q) => format!("{SCOPED_CHECKED_IN_PREFIX}{q}:"),
    };
    key.strip_prefix(prefix.as_str())
        .and_then(|rest| rest.parse::<i64>().ok())
        .and_then(TicketId::new)
        .map(KeyKind::CheckedIn)
}
