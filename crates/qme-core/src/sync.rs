//! Single reducer fed by every synchronization channel.
//!
//! Polling, the same-device bus, storage-change events and realtime push
//! all translate into [`SyncUpdate`]s. Each update is idempotent and none
//! assumes monotonic values, so arrival order across channels does not
//! matter: a stale update is corrected by the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::{QueueMetric, clamp_now_serving, queue_count};
use crate::proximity::ProximityInput;
use crate::types::{Ticket, TicketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SyncUpdate {
    /// Replace the cached "now serving" value.
    NowServing { value: i64 },
    /// Replace the cached last-issued ticket number.
    LastIssued { value: i64 },
    /// Adopt a ticket written by this or another tab.
    TicketAdopted { ticket: Ticket },
    /// Adopt a check-in for the given ticket.
    CheckedIn { ticket_id: TicketId },
    /// Drop the ticket. `None` clears whatever is held.
    TicketCleared { ticket_id: Option<TicketId> },
}

/// Everything one tab knows about one queue.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabState {
    pub now_serving: Option<QueueMetric>,
    pub last_issued: i64,
    pub ticket: Option<Ticket>,
}

impl TabState {
    pub fn with_ticket(ticket: Option<Ticket>) -> Self {
        Self {
            ticket,
            ..Self::default()
        }
    }

    /// Apply one update. Returns whether anything observable changed.
    pub fn apply(&mut self, update: SyncUpdate, now: DateTime<Utc>) -> bool {
        match update {
            SyncUpdate::NowServing { value } => {
                let value = clamp_now_serving(value);
                let changed = self.now_serving.map(|m| m.now_serving) != Some(value);
                self.now_serving = Some(QueueMetric::new(value, now));
                changed
            }
            SyncUpdate::LastIssued { value } => {
                let value = value.max(0);
                let changed = self.last_issued != value;
                self.last_issued = value;
                changed
            }
            SyncUpdate::TicketAdopted { ticket } => {
                let next = match self.ticket {
                    // Same ticket: refresh the number, never un-check-in.
                    Some(held) if held.id == ticket.id => Ticket {
                        id: held.id,
                        number: ticket.number,
                        checked_in: held.checked_in || ticket.checked_in,
                    },
                    // Empty or a different ticket: last write wins.
                    _ => ticket,
                };
                let changed = self.ticket != Some(next);
                self.ticket = Some(next);
                changed
            }
            SyncUpdate::CheckedIn { ticket_id } => match self.ticket.as_mut() {
                Some(held) if held.id == ticket_id && !held.checked_in => {
                    held.checked_in = true;
                    true
                }
                _ => false,
            },
            SyncUpdate::TicketCleared { ticket_id } => {
                let matches = match (self.ticket, ticket_id) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(held), Some(id)) => held.id == id,
                };
                if matches {
                    self.ticket = None;
                }
                matches
            }
        }
    }

    pub fn queue_count(&self) -> Option<u64> {
        self.now_serving
            .map(|m| queue_count(self.last_issued, m.now_serving))
    }

    /// Input for the proximity machine, once both numbers are known.
    pub fn proximity_input(&self) -> Option<ProximityInput> {
        let metric = self.now_serving?;
        let ticket = self.ticket?;
        Some(ProximityInput {
            now_serving: metric.now_serving,
            ticket_number: ticket.number,
            checked_in: ticket.checked_in,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TicketNumber;

    fn ticket(id: i64, number: i64, checked_in: bool) -> Ticket {
        Ticket {
            id: TicketId::new(id).expect("positive id"),
            number: TicketNumber::new(number),
            checked_in,
        }
    }

    fn tid(id: i64) -> TicketId {
        TicketId::new(id).expect("positive id")
    }

    #[test]
    fn now_serving_is_idempotent() {
        let mut s = TabState::default();
        let now = Utc::now();
        assert!(s.apply(SyncUpdate::NowServing { value: 4 }, now));
        assert!(!s.apply(SyncUpdate::NowServing { value: 4 }, now));
        assert!(s.apply(SyncUpdate::NowServing { value: 2 }, now), "no monotonicity assumed");
        assert_eq!(s.now_serving.map(|m| m.now_serving), Some(2));
    }

    #[test]
    fn now_serving_clamped() {
        let mut s = TabState::default();
        s.apply(SyncUpdate::NowServing { value: -5 }, Utc::now());
        assert_eq!(s.now_serving.map(|m| m.now_serving), Some(1));
    }

    #[test]
    fn adopt_same_ticket_keeps_check_in() {
        let mut s = TabState::with_ticket(Some(ticket(5, 5, true)));
        let changed = s.apply(
            SyncUpdate::TicketAdopted { ticket: ticket(5, 5, false) },
            Utc::now(),
        );
        assert!(!changed);
        assert_eq!(s.ticket, Some(ticket(5, 5, true)));
    }

    #[test]
    fn adopt_renumbered_ticket() {
        let mut s = TabState::with_ticket(Some(ticket(5, 5, false)));
        assert!(s.apply(SyncUpdate::TicketAdopted { ticket: ticket(5, 2, false) }, Utc::now()));
        assert_eq!(s.ticket.map(|t| t.number.get()), Some(2));
    }

    #[test]
    fn adopt_different_ticket_replaces() {
        let mut s = TabState::with_ticket(Some(ticket(5, 5, true)));
        assert!(s.apply(SyncUpdate::TicketAdopted { ticket: ticket(6, 6, false) }, Utc::now()));
        assert_eq!(s.ticket, Some(ticket(6, 6, false)));
    }

    #[test]
    fn check_in_only_for_held_ticket() {
        let mut s = TabState::with_ticket(Some(ticket(5, 5, false)));
        assert!(!s.apply(SyncUpdate::CheckedIn { ticket_id: tid(6) }, Utc::now()));
        assert!(s.apply(SyncUpdate::CheckedIn { ticket_id: tid(5) }, Utc::now()));
        assert!(!s.apply(SyncUpdate::CheckedIn { ticket_id: tid(5) }, Utc::now()));
    }

    #[test]
    fn clear_targeted_and_untargeted() {
        let mut s = TabState::with_ticket(Some(ticket(5, 5, false)));
        assert!(!s.apply(SyncUpdate::TicketCleared { ticket_id: Some(tid(9)) }, Utc::now()));
        assert!(s.ticket.is_some());
        assert!(s.apply(SyncUpdate::TicketCleared { ticket_id: Some(tid(5)) }, Utc::now()));
        assert!(s.ticket.is_none());
        assert!(!s.apply(SyncUpdate::TicketCleared { ticket_id: None }, Utc::now()));

        let mut s = TabState::with_ticket(Some(ticket(5, 5, false)));
        assert!(s.apply(SyncUpdate::TicketCleared { ticket_id: None }, Utc::now()));
    }

    #[test]
    fn queue_count_needs_now_serving() {
        let mut s = TabState::default();
        s.apply(SyncUpdate::LastIssued { value: 12 }, Utc::now());
        assert_eq!(s.queue_count(), None);
        s.apply(SyncUpdate::NowServing { value: 10 }, Utc::now());
        assert_eq!(s.queue_count(), Some(3));
    }

    #[test]
    fn proximity_input_needs_both_values() {
        let mut s = TabState::default();
        assert!(s.proximity_input().is_none());
        s.apply(SyncUpdate::NowServing { value: 3 }, Utc::now());
        assert!(s.proximity_input().is_none());
        s.apply(SyncUpdate::TicketAdopted { ticket: ticket(9, 4, true) }, Utc::now());
        let input = s.proximity_input().expect("input");
        assert_eq!(input.gap(), -1);
        assert!(input.checked_in);
    }
}
