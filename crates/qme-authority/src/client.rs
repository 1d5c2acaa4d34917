//! Ticket Issuance Client.
//!
//! Picks the method family for the queue scope, builds parameters, and
//! normalizes every reply through `qme_core::reply` so callers only see
//! [`IssuedTicket`] and plain integers.

use qme_core::reply::{integer_of, normalize_claim, normalize_count, normalize_restore};
use qme_core::{
    IssuedTicket, LeaveReason, QueueScope, QueueSnapshot, StatusCounts, TicketId, TicketNumber,
    parse_now_serving,
};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use crate::error::AuthorityError;
use crate::transport::{RowChange, RpcMethod, RpcTransport};

#[derive(Debug, Clone)]
pub struct IssuanceClient<T> {
    transport: T,
}

impl<T: RpcTransport> IssuanceClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<RowChange>> {
        self.transport.subscribe()
    }

    /// Issue a fresh ticket.
    pub async fn claim(&self, scope: &QueueScope) -> Result<IssuedTicket, AuthorityError> {
        let reply = self.call(RpcMethod::Claim, scope, Map::new()).await?;
        Ok(normalize_claim(&reply)?)
    }

    /// Last issued ticket number, without issuing one.
    pub async fn peek(&self, scope: &QueueScope) -> Result<i64, AuthorityError> {
        let reply = self.call(RpcMethod::Peek, scope, Map::new()).await?;
        Ok(normalize_count(&reply))
    }

    /// Re-register a ticket the guest already holds. Idempotent; raises the
    /// authority's counters so it never reissues a held id or number.
    pub async fn restore(
        &self,
        scope: &QueueScope,
        ticket: TicketId,
        held: TicketNumber,
    ) -> Result<IssuedTicket, AuthorityError> {
        let mut params = Map::new();
        params.insert("p_ticket_id".into(), json!(ticket.get()));
        params.insert("p_ticket_number".into(), json!(held.get()));
        let reply = self.call(RpcMethod::Restore, scope, params).await?;
        Ok(normalize_restore(&reply, ticket, held))
    }

    pub async fn check_in(&self, ticket: TicketId) -> Result<(), AuthorityError> {
        let mut params = Map::new();
        params.insert("p_ticket_id".into(), json!(ticket.get()));
        self.call(RpcMethod::CheckIn, &QueueScope::Legacy, params)
            .await
            .map(drop)
    }

    pub async fn leave(&self, ticket: TicketId, reason: LeaveReason) -> Result<(), AuthorityError> {
        let mut params = Map::new();
        params.insert("p_ticket_id".into(), json!(ticket.get()));
        params.insert("p_reason".into(), json!(reason.as_str()));
        self.call(RpcMethod::Leave, &QueueScope::Legacy, params)
            .await
            .map(drop)
    }

    /// Current "now serving" value, clamped to `>= 1`.
    pub async fn now_serving(&self, scope: &QueueScope) -> Result<i64, AuthorityError> {
        let reply = self.call(RpcMethod::GetNowServing, scope, Map::new()).await?;
        Ok(parse_now_serving(&reply))
    }

    /// Set "now serving"; returns the value the authority stored.
    pub async fn set_now_serving(&self, scope: &QueueScope, value: i64) -> Result<i64, AuthorityError> {
        let mut params = Map::new();
        params.insert("value".into(), json!(value));
        let reply = self.call(RpcMethod::SetNowServing, scope, params).await?;
        Ok(parse_now_serving(&reply))
    }

    pub async fn snapshot(&self, scope: &QueueScope) -> Result<QueueSnapshot, AuthorityError> {
        let reply = self.call(RpcMethod::Snapshot, scope, Map::new()).await?;
        Ok(normalize_snapshot(&reply))
    }

    /// Tickets of this queue that were abandoned.
    pub async fn lost_count(&self, scope: &QueueScope) -> Result<i64, AuthorityError> {
        let reply = self.call(RpcMethod::LostCount, scope, Map::new()).await?;
        Ok(normalize_count(&reply))
    }

    /// Operator reset: forget every ticket of the queue and restart numbering.
    pub async fn reset(&self, scope: &QueueScope) -> Result<(), AuthorityError> {
        self.call(RpcMethod::Reset, scope, Map::new()).await.map(drop)
    }

    async fn call(
        &self,
        method: RpcMethod,
        scope: &QueueScope,
        mut params: Map<String, Value>,
    ) -> Result<Value, AuthorityError> {
        if let Some(queue) = scope.queue_id() {
            params.insert("p_queue_id".into(), json!(queue));
        }
        let name = method.name(scope);
        tracing::trace!(method = name, %scope, "authority call");
        self.transport.call(name, Value::Object(params)).await
    }
}

/// Both snapshot shapes: scoped `now_serving` and legacy `metric1`.
fn normalize_snapshot(value: &Value) -> QueueSnapshot {
    let now_serving = value
        .get("now_serving")
        .or_else(|| value.get("metric1"))
        .map_or(1, parse_now_serving);
    let last_issued = value
        .get("lastIssued")
        .or_else(|| value.get("last_issued"))
        .and_then(integer_of)
        .unwrap_or(0)
        .max(0);
    let counts = value
        .get("counts")
        .cloned()
        .and_then(|c| serde_json::from_value::<StatusCounts>(c).ok())
        .unwrap_or_default();
    QueueSnapshot {
        now_serving,
        counts,
        last_issued,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls and answers from a fixed script.
    struct Scripted {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Value,
    }

    impl Scripted {
        fn new(reply: Value) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply,
            }
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl RpcTransport for Scripted {
        async fn call(&self, method: &str, params: Value) -> Result<Value, AuthorityError> {
            self.calls
                .lock()
                .expect("lock")
                .push((method.to_string(), params));
            Ok(self.reply.clone())
        }
    }

    fn food() -> QueueScope {
        QueueScope::queue("food").expect("valid queue")
    }

    fn id(n: i64) -> TicketId {
        TicketId::new(n).expect("positive")
    }

    #[tokio::test]
    async fn scoped_claim_sends_queue_id() {
        let client = IssuanceClient::new(Scripted::new(json!({"id": 41, "ticket_number": 3})));
        let issued = client.claim(&food()).await.expect("claim");
        assert_eq!(issued.id, id(41));
        assert_eq!(issued.number.get(), 3);

        let calls = client.transport().calls();
        assert_eq!(calls[0].0, "next_ticket_for_queue");
        assert_eq!(calls[0].1["p_queue_id"], "food");
    }

    #[tokio::test]
    async fn legacy_claim_scalar_reply() {
        let client = IssuanceClient::new(Scripted::new(json!(7)));
        let issued = client.claim(&QueueScope::Legacy).await.expect("claim");
        assert_eq!(issued.id, id(7));
        assert_eq!(issued.number.get(), 7);

        let calls = client.transport().calls();
        assert_eq!(calls[0].0, "next_ticket");
        assert!(calls[0].1.get("p_queue_id").is_none());
    }

    #[tokio::test]
    async fn claim_without_id_is_an_error() {
        let client = IssuanceClient::new(Scripted::new(json!({"ticket_number": 3})));
        let err = client.claim(&food()).await.expect_err("no id");
        assert!(matches!(err, AuthorityError::Malformed(_)));
    }

    #[tokio::test]
    async fn restore_falls_back_to_held_values() {
        let client = IssuanceClient::new(Scripted::new(Value::Null));
        let issued = client
            .restore(&food(), id(41), TicketNumber::new(3))
            .await
            .expect("restore");
        assert_eq!(issued.id, id(41));
        assert_eq!(issued.number.get(), 3);

        let calls = client.transport().calls();
        assert_eq!(calls[0].0, "restore_ticket_for_queue");
        assert_eq!(calls[0].1["p_ticket_id"], 41);
        assert_eq!(calls[0].1["p_ticket_number"], 3);
    }

    #[tokio::test]
    async fn leave_sends_reason() {
        let client = IssuanceClient::new(Scripted::new(json!({"ok": true})));
        client
            .leave(id(5), LeaveReason::NoCheckInTimeout)
            .await
            .expect("leave");
        let calls = client.transport().calls();
        assert_eq!(calls[0].0, "leave_queue");
        assert_eq!(calls[0].1["p_reason"], "noCheckInTimeout");
    }

    #[tokio::test]
    async fn metric_shapes_are_normalized() {
        let legacy = IssuanceClient::new(Scripted::new(json!({"value": 0, "ts": 1})));
        assert_eq!(legacy.now_serving(&QueueScope::Legacy).await.expect("get"), 1);

        let scoped = IssuanceClient::new(Scripted::new(json!("12")));
        assert_eq!(scoped.now_serving(&food()).await.expect("get"), 12);
        assert_eq!(scoped.transport().calls()[0].0, "get_now_serving");
    }

    #[tokio::test]
    async fn peek_unknown_shape_reads_zero() {
        let client = IssuanceClient::new(Scripted::new(json!(["?"])));
        assert_eq!(client.peek(&food()).await.expect("peek"), 0);
    }

    #[test]
    fn snapshot_accepts_legacy_shape() {
        let snap = normalize_snapshot(&json!({
            "metric1": 4,
            "lastIssued": 9,
            "counts": {"total": 3, "waiting": 1, "checked_in": 1, "left": 1, "served": 0}
        }));
        assert_eq!(snap.now_serving, 4);
        assert_eq!(snap.last_issued, 9);
        assert_eq!(snap.counts.total, 3);

        let empty = normalize_snapshot(&Value::Null);
        assert_eq!(empty.now_serving, 1);
        assert_eq!(empty.counts, StatusCounts::default());
    }
}
