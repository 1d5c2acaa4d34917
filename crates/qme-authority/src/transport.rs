//! Transport seam between the guest and the authority.
//!
//! Implementations: [`LocalTransport`](crate::LocalTransport) (in-process
//! reference authority) and the runtime's Unix-socket client. Tests swap in
//! counting or failing mocks.

use std::future::Future;
use std::sync::Arc;

use qme_core::QueueScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::AuthorityError;

/// A remote procedure the authority exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Claim,
    Peek,
    Restore,
    CheckIn,
    Leave,
    GetNowServing,
    SetNowServing,
    Snapshot,
    LostCount,
    Reset,
}

impl RpcMethod {
    /// Wire name. The legacy queue has its own method family; check-in and
    /// leave are shared because they address tickets by global id.
    pub fn name(self, scope: &QueueScope) -> &'static str {
        let legacy = scope.is_legacy();
        match self {
            Self::Claim if legacy => "next_ticket",
            Self::Claim => "next_ticket_for_queue",
            Self::Peek if legacy => "peek_ticket",
            Self::Peek => "peek_ticket_for_queue",
            Self::Restore if legacy => "restore_ticket",
            Self::Restore => "restore_ticket_for_queue",
            Self::CheckIn => "check_in_ticket",
            Self::Leave => "leave_queue",
            Self::GetNowServing if legacy => "get_metric1",
            Self::GetNowServing => "get_now_serving",
            Self::SetNowServing if legacy => "set_metric1",
            Self::SetNowServing => "set_now_serving",
            Self::Snapshot if legacy => "admin_snapshot",
            Self::Snapshot => "admin_snapshot_for_queue",
            Self::LostCount if legacy => "lost_count",
            Self::LostCount => "lost_count_for_queue",
            Self::Reset if legacy => "reset_queue",
            Self::Reset => "reset_queue_for_queue",
        }
    }

    /// Inverse of [`RpcMethod::name`]: the method and whether it is the
    /// legacy-family spelling.
    pub fn parse(name: &str) -> Option<(Self, bool)> {
        let parsed = match name {
            "next_ticket" => (Self::Claim, true),
            "next_ticket_for_queue" => (Self::Claim, false),
            "peek_ticket" => (Self::Peek, true),
            "peek_ticket_for_queue" => (Self::Peek, false),
            "restore_ticket" => (Self::Restore, true),
            "restore_ticket_for_queue" => (Self::Restore, false),
            "check_in_ticket" => (Self::CheckIn, false),
            "leave_queue" => (Self::Leave, false),
            "get_metric1" => (Self::GetNowServing, true),
            "get_now_serving" => (Self::GetNowServing, false),
            "set_metric1" => (Self::SetNowServing, true),
            "set_now_serving" => (Self::SetNowServing, false),
            "admin_snapshot" => (Self::Snapshot, true),
            "admin_snapshot_for_queue" => (Self::Snapshot, false),
            "lost_count" => (Self::LostCount, true),
            "lost_count_for_queue" => (Self::LostCount, false),
            "reset_queue" => (Self::Reset, true),
            "reset_queue_for_queue" => (Self::Reset, false),
            _ => return None,
        };
        Some(parsed)
    }

    /// Whether a successful call changes authority state.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::Claim
                | Self::Restore
                | Self::CheckIn
                | Self::Leave
                | Self::SetNowServing
                | Self::Reset
        )
    }
}

/// Row-change notification pushed by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum RowChange {
    NowServing { queue: QueueScope, value: i64 },
    TicketIssued { queue: QueueScope, number: i64 },
    QueueReset { queue: QueueScope },
}

impl RowChange {
    pub fn queue(&self) -> &QueueScope {
        match self {
            Self::NowServing { queue, .. }
            | Self::TicketIssued { queue, .. }
            | Self::QueueReset { queue } => queue,
        }
    }
}

/// Request/response channel to the authority, plus optional push.
pub trait RpcTransport: Send + Sync {
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, AuthorityError>> + Send;

    /// Realtime row changes. `None` when the transport has no push channel;
    /// polling then carries every update.
    fn subscribe(&self) -> Option<broadcast::Receiver<RowChange>> {
        None
    }
}

impl<T: RpcTransport> RpcTransport for Arc<T> {
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, AuthorityError>> + Send {
        (**self).call(method, params)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<RowChange>> {
        (**self).subscribe()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
