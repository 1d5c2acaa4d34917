//! Reference authority: the ticket issuer the guest talks to.
//!
//! Holds one global ticket-id sequence, a counter and a "now serving" value
//! per queue, ticket rows and a leave history. Counters survive a restart
//! through [`PersistedState`]; ticket rows do not, which is why guests
//! re-register held tickets with `restore`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use qme_core::reply::integer_of;
use qme_core::{
    LeaveReason, QueueScope, QueueSnapshot, StatusCounts, TicketStatus, parse_now_serving,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::error::AuthorityError;
use crate::transport::{RowChange, RpcMethod};

const CHANGE_CAPACITY: usize = 256;

/// Shape of claim and restore replies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFormat {
    /// Bare integers; ticket numbers equal ticket ids.
    Legacy,
    /// `{"id", "ticket_number"}` objects with per-queue numbering.
    #[default]
    Structured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketRow {
    pub id: i64,
    pub queue: QueueScope,
    pub number: i64,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub left_reason: Option<LeaveReason>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaveRecord {
    pub ticket_id: i64,
    pub reason: LeaveReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueCounters {
    /// Last issued ticket number.
    counter: i64,
    now_serving: i64,
    now_serving_at: DateTime<Utc>,
}

impl QueueCounters {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            counter: 0,
            now_serving: 1,
            now_serving_at: now,
        }
    }
}

/// What survives an authority restart.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub last_id: i64,
    pub queues: Vec<PersistedQueue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedQueue {
    pub queue: QueueScope,
    pub counter: i64,
    pub now_serving: i64,
    pub now_serving_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct AuthorityState {
    format: ReplyFormat,
    last_id: i64,
    queues: HashMap<QueueScope, QueueCounters>,
    tickets: BTreeMap<i64, TicketRow>,
    leaves: Vec<LeaveRecord>,
    changes: broadcast::Sender<RowChange>,
}

impl Default for AuthorityState {
    fn default() -> Self {
        Self::new(ReplyFormat::default())
    }
}

impl AuthorityState {
    pub fn new(format: ReplyFormat) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            format,
            last_id: 0,
            queues: HashMap::new(),
            tickets: BTreeMap::new(),
            leaves: Vec::new(),
            changes,
        }
    }

    pub fn from_persisted(persisted: PersistedState, format: ReplyFormat) -> Self {
        let mut state = Self::new(format);
        state.load(persisted);
        state
    }

    pub fn format(&self) -> ReplyFormat {
        self.format
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RowChange> {
        self.changes.subscribe()
    }

    pub fn persisted(&self) -> PersistedState {
        let mut queues: Vec<PersistedQueue> = self
            .queues
            .iter()
            .map(|(queue, c)| PersistedQueue {
                queue: queue.clone(),
                counter: c.counter,
                now_serving: c.now_serving,
                now_serving_at: c.now_serving_at,
            })
            .collect();
        queues.sort_by(|a, b| a.queue.to_string().cmp(&b.queue.to_string()));
        PersistedState {
            last_id: self.last_id,
            queues,
        }
    }

    /// Simulate a restart: everything but the persisted counters is lost.
    /// Subscribers stay attached.
    pub fn restart(&mut self, persisted: Option<PersistedState>) {
        self.last_id = 0;
        self.queues.clear();
        self.tickets.clear();
        self.leaves.clear();
        if let Some(p) = persisted {
            self.load(p);
        }
        tracing::info!(last_id = self.last_id, "authority restarted");
    }

    pub fn ticket(&self, id: i64) -> Option<&TicketRow> {
        self.tickets.get(&id)
    }

    pub fn leaves(&self) -> &[LeaveRecord] {
        &self.leaves
    }

    fn load(&mut self, persisted: PersistedState) {
        self.last_id = persisted.last_id.max(0);
        for q in persisted.queues {
            self.queues.insert(
                q.queue,
                QueueCounters {
                    counter: q.counter.max(0),
                    now_serving: q.now_serving.max(1),
                    now_serving_at: q.now_serving_at,
                },
            );
        }
    }

    // ─── Dispatch ─────────────────────────────────────────────────────

    /// Execute one wire call.
    pub fn dispatch(&mut self, method: &str, params: &Value) -> Result<Value, AuthorityError> {
        let (rpc, legacy_family) =
            RpcMethod::parse(method).ok_or_else(|| AuthorityError::method_not_found(method))?;
        let scope = if legacy_family {
            QueueScope::Legacy
        } else {
            scope_param(params)?
        };
        let now = Utc::now();

        match rpc {
            RpcMethod::Claim => Ok(self.claim(scope, now)),
            RpcMethod::Peek => Ok(json!(self.counters(&scope).counter)),
            RpcMethod::Restore => {
                let id = id_param(params)?;
                let hint = params.get("p_ticket_number").and_then(integer_of);
                Ok(self.restore(scope, id, hint, now))
            }
            RpcMethod::CheckIn => {
                self.check_in(id_param(params)?, now)?;
                Ok(json!({"ok": true}))
            }
            RpcMethod::Leave => {
                let reason = match params.get("p_reason").and_then(Value::as_str) {
                    Some(raw) => raw
                        .parse::<LeaveReason>()
                        .map_err(|e| AuthorityError::invalid_params(e.to_string()))?,
                    None => LeaveReason::User,
                };
                self.leave(id_param(params)?, reason, now);
                Ok(json!({"ok": true}))
            }
            RpcMethod::GetNowServing => {
                let c = self.counters(&scope);
                Ok(metric_reply(legacy_family, c))
            }
            RpcMethod::SetNowServing => {
                let value = parse_now_serving(params.get("value").unwrap_or(&Value::Null));
                let c = self.set_now_serving(scope, value, now);
                Ok(metric_reply(legacy_family, c))
            }
            RpcMethod::Snapshot => {
                let snap = self.snapshot(&scope);
                let mut value = serde_json::to_value(&snap)?;
                if legacy_family {
                    value["metric1"] = json!(snap.now_serving);
                }
                Ok(value)
            }
            RpcMethod::LostCount => Ok(json!(self.lost_count(&scope))),
            RpcMethod::Reset => {
                self.reset(scope, now);
                Ok(json!({"ok": true}))
            }
        }
    }

    // ─── Operations ───────────────────────────────────────────────────

    fn counters(&self, scope: &QueueScope) -> QueueCounters {
        self.queues
            .get(scope)
            .copied()
            .unwrap_or_else(|| QueueCounters::new(Utc::now()))
    }

    fn counters_mut(&mut self, scope: &QueueScope, now: DateTime<Utc>) -> &mut QueueCounters {
        self.queues
            .entry(scope.clone())
            .or_insert_with(|| QueueCounters::new(now))
    }

    fn claim(&mut self, scope: QueueScope, now: DateTime<Utc>) -> Value {
        self.last_id += 1;
        let id = self.last_id;
        let format = self.format;
        let counters = self.counters_mut(&scope, now);
        let number = if scope.is_legacy() || format == ReplyFormat::Legacy {
            id
        } else {
            counters.counter + 1
        };
        counters.counter = counters.counter.max(number);

        self.tickets.insert(id, TicketRow::new(id, scope.clone(), number, now));
        tracing::debug!(id, number, queue = %scope, "ticket issued");
        self.push(RowChange::TicketIssued {
            queue: scope,
            number,
        });
        self.ticket_reply(id, number)
    }

    fn restore(&mut self, scope: QueueScope, id: i64, hint: Option<i64>, now: DateTime<Utc>) -> Value {
        let number = match self.tickets.get(&id) {
            Some(row) => row.number,
            None => {
                let number = hint.unwrap_or(id).max(1);
                self.tickets.insert(id, TicketRow::new(id, scope.clone(), number, now));
                tracing::info!(id, number, queue = %scope, "restored unknown ticket");
                number
            }
        };
        self.last_id = self.last_id.max(id);
        let counters = self.counters_mut(&scope, now);
        counters.counter = counters.counter.max(number);
        self.ticket_reply(id, number)
    }

    fn check_in(&mut self, id: i64, now: DateTime<Utc>) -> Result<(), AuthorityError> {
        let row = self
            .tickets
            .get_mut(&id)
            .ok_or_else(|| AuthorityError::not_found(format!("ticket {id} not found")))?;
        if row.status == TicketStatus::Waiting {
            row.status = TicketStatus::CheckedIn;
        }
        row.checked_in_at.get_or_insert(now);
        row.updated_at = now;
        Ok(())
    }

    fn leave(&mut self, id: i64, reason: LeaveReason, now: DateTime<Utc>) {
        if let Some(row) = self.tickets.get_mut(&id) {
            row.status = TicketStatus::Left;
            row.left_reason = Some(reason);
            row.updated_at = now;
        }
        self.leaves.push(LeaveRecord {
            ticket_id: id,
            reason,
            at: now,
        });
        tracing::debug!(id, %reason, "ticket left");
    }

    fn set_now_serving(&mut self, scope: QueueScope, value: i64, now: DateTime<Utc>) -> QueueCounters {
        let counters = self.counters_mut(&scope, now);
        counters.now_serving = value;
        counters.now_serving_at = now;
        let snapshot = *counters;

        // Checked-in guests whose turn has passed count as served.
        for row in self.tickets.values_mut() {
            if row.queue == scope && row.status == TicketStatus::CheckedIn && row.number < value {
                row.status = TicketStatus::Served;
                row.updated_at = now;
            }
        }
        self.push(RowChange::NowServing {
            queue: scope,
            value,
        });
        snapshot
    }

    fn snapshot(&self, scope: &QueueScope) -> QueueSnapshot {
        let mut counts = StatusCounts::default();
        for row in self.tickets.values().filter(|r| &r.queue == scope) {
            counts.record(row.status);
        }
        let c = self.counters(scope);
        QueueSnapshot {
            now_serving: c.now_serving,
            counts,
            last_issued: c.counter,
        }
    }

    fn lost_count(&self, scope: &QueueScope) -> u64 {
        self.tickets
            .values()
            .filter(|r| &r.queue == scope && r.status == TicketStatus::Left)
            .count() as u64
    }

    fn reset(&mut self, scope: QueueScope, now: DateTime<Utc>) {
        self.tickets.retain(|_, r| r.queue != scope);
        let ids: Vec<i64> = self.tickets.keys().copied().collect();
        self.leaves.retain(|l| ids.contains(&l.ticket_id));
        self.queues.insert(scope.clone(), QueueCounters::new(now));
        tracing::info!(queue = %scope, "queue reset");
        self.push(RowChange::QueueReset { queue: scope });
    }

    fn ticket_reply(&self, id: i64, number: i64) -> Value {
        match self.format {
            ReplyFormat::Legacy => json!(number),
            ReplyFormat::Structured => json!({"id": id, "ticket_number": number}),
        }
    }

    fn push(&self, change: RowChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl TicketRow {
    fn new(id: i64, queue: QueueScope, number: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            queue,
            number,
            status: TicketStatus::Waiting,
            created_at: now,
            checked_in_at: None,
            left_reason: None,
            updated_at: now,
        }
    }
}

fn metric_reply(legacy_family: bool, c: QueueCounters) -> Value {
    if legacy_family {
        json!({"value": c.now_serving, "ts": c.now_serving_at.timestamp_millis()})
    } else {
        json!(c.now_serving)
    }
}

fn id_param(params: &Value) -> Result<i64, AuthorityError> {
    params
        .get("p_ticket_id")
        .and_then(integer_of)
        .filter(|id| *id > 0)
        .ok_or_else(|| AuthorityError::invalid_params("p_ticket_id required"))
}

fn scope_param(params: &Value) -> Result<QueueScope, AuthorityError> {
    match params.get("p_queue_id").and_then(Value::as_str) {
        Some(q) => QueueScope::queue(q).map_err(|e| AuthorityError::invalid_params(e.to_string())),
        // Shared methods (check-in, leave) carry no queue.
        None => Ok(QueueScope::Legacy),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
