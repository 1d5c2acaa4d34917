//! Synchronization Fabric: one task per tab feeding its [`GuestSession`].
//!
//! Channels, all optional except polling:
//!
//! - polling every `poll_interval`: shared storage, `now serving` and the
//!   last issued number
//! - the same-device [`Bus`](crate::Bus)
//! - storage-change events from sibling tabs of the profile
//! - realtime push from the authority, when the transport has one
//!
//! Every channel ends in the same idempotent reducer, so arrival order does
//! not matter. A lagging receiver is tolerated; a closed one is dropped and
//! polling carries on.

use std::sync::Arc;

use qme_authority::{RowChange, RpcTransport};
use qme_core::{QueueScope, SyncUpdate, Ticket};
use qme_store::keys::classify;
use qme_store::ticket_store::parse_ticket_id;
use qme_store::{KeyKind, StorageEvent, StorageEvents, TicketStore};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusMessage, BusReceiver, TabBus};
use crate::session::GuestSession;

/// Receivers for the event-driven channels.
struct Channels {
    bus: Option<BusReceiver>,
    storage: Option<StorageEvents>,
    push: Option<broadcast::Receiver<RowChange>>,
}

impl Channels {
    fn subscribe<T: RpcTransport>(session: &GuestSession<T>) -> Self {
        let ctx = session.context();
        Self {
            bus: ctx.bus.as_ref().map(TabBus::subscribe),
            storage: Some(ctx.store.subscribe()),
            push: session.coordinator().client().subscribe(),
        }
    }
}

/// Spawn the fabric for `session` on the current runtime. Channels are subscribed before
/// this returns, so nothing a sibling does afterwards is missed.
pub fn spawn<T: RpcTransport + 'static>(
    session: Arc<GuestSession<T>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let channels = Channels::subscribe(&session);
    tokio::spawn(async move { drive(&session, channels, cancel).await })
}

/// Drive `session` until `cancel` fires.
async fn drive<T: RpcTransport>(session: &GuestSession<T>, channels: Channels, cancel: CancellationToken) {
    let ctx = session.context();
    let scope = &ctx.scope;
    let mut ticker = interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let Channels {
        mut bus,
        mut storage,
        mut push,
    } = channels;
    tracing::debug!(
        tab = %ctx.tab,
        queue = %scope,
        bus = bus.is_some(),
        push = push.is_some(),
        "sync fabric started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => session.refresh().await,
            Some(received) = next_bus(&mut bus) => match received {
                Ok(message) if message.queue() == scope => {
                    session.apply(message.to_update()).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(tab = %ctx.tab, "bus lagged by {n} messages");
                }
                Err(RecvError::Closed) => bus = None,
            },
            Some(received) = next_storage(&mut storage) => match received {
                Ok(event) => {
                    if let Some(update) = storage_update(&ctx.store, scope, &event) {
                        session.apply(update).await;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(tab = %ctx.tab, "missed {n} storage events, re-reading");
                    session.resync().await;
                }
                Err(RecvError::Closed) => storage = None,
            },
            Some(received) = next_push(&mut push) => match received {
                Ok(RowChange::QueueReset { queue }) if &queue == scope => {
                    tracing::info!(tab = %ctx.tab, "queue reset by operator");
                    session.nuke().await;
                    session.refresh().await;
                }
                Ok(change) => {
                    if let Some(update) = push_update(scope, &change) {
                        session.apply(update).await;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(tab = %ctx.tab, "push lagged by {n} changes");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!(tab = %ctx.tab, "push channel closed, polling only");
                    push = None;
                }
            },
        }
    }
    tracing::debug!(tab = %ctx.tab, "sync fabric stopped");
}

async fn next_bus(rx: &mut Option<BusReceiver>) -> Option<Result<BusMessage, RecvError>> {
    match rx {
        Some(rx) => Some(rx.recv().await),
        None => None,
    }
}

async fn next_storage(rx: &mut Option<StorageEvents>) -> Option<Result<StorageEvent, RecvError>> {
    match rx {
        Some(rx) => Some(rx.recv().await),
        None => None,
    }
}

async fn next_push(
    rx: &mut Option<broadcast::Receiver<RowChange>>,
) -> Option<Result<RowChange, RecvError>> {
    match rx {
        Some(rx) => Some(rx.recv().await),
        None => None,
    }
}

/// Translate a sibling tab's storage write into a reducer update.
pub fn storage_update(store: &TicketStore, scope: &QueueScope, event: &StorageEvent) -> Option<SyncUpdate> {
    match classify(scope, &event.key)? {
        KeyKind::TicketId => match event.new_value.as_deref().and_then(parse_ticket_id) {
            Some(id) => {
                let mut ticket = Ticket::new(id, store.number_or_id(scope, id));
                ticket.checked_in = store.is_checked_in(scope, id);
                Some(SyncUpdate::TicketAdopted { ticket })
            }
            None => Some(SyncUpdate::TicketCleared {
                ticket_id: event.old_value.as_deref().and_then(parse_ticket_id),
            }),
        },
        // The id key follows; only refresh a ticket that is already stored.
        KeyKind::TicketNumber => store
            .get(scope)
            .map(|ticket| SyncUpdate::TicketAdopted { ticket }),
        KeyKind::CheckedIn(ticket_id) => (event.new_value.as_deref() == Some("1"))
            .then_some(SyncUpdate::CheckedIn { ticket_id }),
    }
}

/// Translate an authority row change for this queue.
pub fn push_update(scope: &QueueScope, change: &RowChange) -> Option<SyncUpdate> {
    if change.queue() != scope {
        return None;
    }
    match *change {
        RowChange::NowServing { value, .. } => Some(SyncUpdate::NowServing { value }),
        RowChange::TicketIssued { number, .. } => Some(SyncUpdate::LastIssued { value: number }),
        RowChange::QueueReset { .. } => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
