//! Same-device broadcast bus.
//!
//! One [`Bus`] per storage profile; each tab joins with a [`TabBus`] handle.
//! A tab never receives its own messages back. Delivery is best effort:
//! a lagging receiver drops messages and relies on the next poll.

use chrono::{DateTime, Utc};
use qme_core::{QueueScope, SyncUpdate, TabId, TicketId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum BusMessage {
    NowServing {
        queue: QueueScope,
        value: i64,
        ts: DateTime<Utc>,
    },
    CheckedIn {
        queue: QueueScope,
        ticket_id: TicketId,
    },
    /// `ticket_id: None` clears whatever the receiver holds.
    TicketCleared {
        queue: QueueScope,
        ticket_id: Option<TicketId>,
    },
}

impl BusMessage {
    pub fn queue(&self) -> &QueueScope {
        match self {
            Self::NowServing { queue, .. }
            | Self::CheckedIn { queue, .. }
            | Self::TicketCleared { queue, .. } => queue,
        }
    }

    pub fn to_update(&self) -> SyncUpdate {
        match *self {
            Self::NowServing { value, .. } => SyncUpdate::NowServing { value },
            Self::CheckedIn { ticket_id, .. } => SyncUpdate::CheckedIn { ticket_id },
            Self::TicketCleared { ticket_id, .. } => SyncUpdate::TicketCleared { ticket_id },
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: TabId,
    message: BusMessage,
}

#[derive(Debug, Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn tab(&self, tab: TabId) -> TabBus {
        TabBus {
            tx: self.tx.clone(),
            tab,
        }
    }
}

/// One tab's handle on the bus.
#[derive(Debug, Clone)]
pub struct TabBus {
    tx: broadcast::Sender<Envelope>,
    tab: TabId,
}

impl TabBus {
    pub fn tab(&self) -> &TabId {
        &self.tab
    }

    /// Post to sibling tabs. Returns whether anyone was listening.
    pub fn publish(&self, message: BusMessage) -> bool {
        tracing::debug!(tab = %self.tab, ?message, "bus publish");
        self.tx
            .send(Envelope {
                origin: self.tab.clone(),
                message,
            })
            .is_ok()
    }

    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            rx: self.tx.subscribe(),
            tab: self.tab.clone(),
        }
    }
}

#[derive(Debug)]
pub struct BusReceiver {
    rx: broadcast::Receiver<Envelope>,
    tab: TabId,
}

impl BusReceiver {
    pub async fn recv(&mut self) -> Result<BusMessage, RecvError> {
        loop {
            let envelope = self.rx.recv().await?;
            if envelope.origin != self.tab {
                return Ok(envelope.message);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<BusMessage, TryRecvError> {
        loop {
            let envelope = self.rx.try_recv()?;
            if envelope.origin != self.tab {
                return Ok(envelope.message);
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
