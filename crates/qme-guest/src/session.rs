//! Guest session: the claim coordinator plus the proximity machine, with
//! the resulting view published on a watch channel.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use qme_authority::{IssuanceClient, RpcTransport};
use qme_core::proximity::step;
use qme_core::{
    GuestView, LeaveReason, ProximityEvent, ProximityPhase, ProximityState, QueueScope, SyncUpdate,
    TabId, Ticket, TicketId, clamp_now_serving,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::bus::BusMessage;
use crate::claim::{ClaimCoordinator, ClaimOutcome};
use crate::context::GuestContext;
use crate::error::ClaimError;

/// What one tab shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestSnapshot {
    pub tab: TabId,
    pub queue: QueueScope,
    pub ticket: Option<Ticket>,
    pub now_serving: Option<i64>,
    pub queue_count: Option<u64>,
    pub phase: ProximityPhase,
    pub view: GuestView,
    /// Events of the latest evaluation.
    pub events: Vec<ProximityEvent>,
    /// Why the last ticket went away, until a new one is held.
    pub left: Option<LeaveReason>,
}

/// Proximity memory for the ticket currently held.
#[derive(Debug, Default)]
struct Tracked {
    ticket: Option<TicketId>,
    checked_in: bool,
    state: ProximityState,
    events: Vec<ProximityEvent>,
    left: Option<LeaveReason>,
}

impl Tracked {
    /// Forget edge-trigger memory when the held ticket changes. Returns
    /// whether the same ticket just became checked in, from whichever tab.
    fn follow(&mut self, ticket: Option<Ticket>) -> bool {
        let id = ticket.map(|t| t.id);
        let checked_in = ticket.is_some_and(|t| t.checked_in);
        if self.ticket != id {
            self.ticket = id;
            self.checked_in = checked_in;
            self.state = ProximityState::default();
            self.events.clear();
            if id.is_some() {
                self.left = None;
            }
            return false;
        }
        let became_checked_in = checked_in && !self.checked_in;
        self.checked_in = checked_in;
        became_checked_in
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct GuestSession<T> {
    coordinator: ClaimCoordinator<T>,
    tracked: Mutex<Tracked>,
    view: watch::Sender<GuestSnapshot>,
}

impl<T> std::fmt::Debug for GuestSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestSession")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl<T: RpcTransport> GuestSession<T> {
    pub fn new(ctx: GuestContext, client: IssuanceClient<T>) -> Self {
        let initial = GuestSnapshot {
            tab: ctx.tab.clone(),
            queue: ctx.scope.clone(),
            ticket: None,
            now_serving: None,
            queue_count: None,
            phase: ProximityPhase::None,
            view: GuestView::default(),
            events: Vec::new(),
            left: None,
        };
        let (view, _) = watch::channel(initial);
        Self {
            coordinator: ClaimCoordinator::new(ctx, client),
            tracked: Mutex::new(Tracked::default()),
            view,
        }
    }

    pub fn context(&self) -> &GuestContext {
        self.coordinator.context()
    }

    pub fn coordinator(&self) -> &ClaimCoordinator<T> {
        &self.coordinator
    }

    pub fn subscribe(&self) -> watch::Receiver<GuestSnapshot> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> GuestSnapshot {
        self.view.borrow().clone()
    }

    /// Mount: claim or adopt, then take a first reading.
    pub async fn start(&self) -> Result<ClaimOutcome, ClaimError> {
        let outcome = self.claim().await?;
        self.refresh().await;
        Ok(outcome)
    }

    pub async fn claim(&self) -> Result<ClaimOutcome, ClaimError> {
        let result = self.coordinator.claim().await;
        self.evaluate().await;
        result
    }

    pub async fn check_in(&self) -> bool {
        if !self.coordinator.check_in().await {
            return false;
        }
        self.evaluate().await;
        true
    }

    pub async fn leave(&self, reason: LeaveReason) -> Option<TicketId> {
        let left = self.coordinator.leave(reason).await;
        if left.is_some() {
            lock(&self.tracked).left = Some(reason);
        }
        self.evaluate().await;
        left
    }

    pub async fn nuke(&self) -> Option<TicketId> {
        let id = self.coordinator.nuke();
        self.evaluate().await;
        id
    }

    /// Poll tick: re-read storage, refresh from the authority and always
    /// re-evaluate, so the "please check in now" notice repeats.
    pub async fn refresh(&self) {
        self.coordinator.refresh().await;
        self.evaluate().await;
    }

    /// Re-read shared storage after missed storage events.
    pub async fn resync(&self) -> bool {
        let changed = self.coordinator.resync();
        if changed {
            self.evaluate().await;
        }
        changed
    }

    /// Apply one update from a sync channel; re-evaluates only on change.
    pub async fn apply(&self, update: SyncUpdate) -> bool {
        let changed = self.coordinator.apply(update);
        if changed {
            self.evaluate().await;
        }
        changed
    }

    /// Set "now serving" from this tab: applied here, pushed to sibling tabs
    /// at once, and written to the authority best-effort. Returns the
    /// clamped value.
    pub async fn publish_now_serving(&self, value: i64) -> i64 {
        let value = clamp_now_serving(value);
        let ctx = self.context();
        self.apply(SyncUpdate::NowServing { value }).await;
        if let Some(bus) = &ctx.bus {
            bus.publish(BusMessage::NowServing {
                queue: ctx.scope.clone(),
                value,
                ts: Utc::now(),
            });
        }
        if let Err(e) = self.coordinator.client().set_now_serving(&ctx.scope, value).await {
            tracing::warn!(tab = %ctx.tab, "now-serving {value} not stored remotely: {e}");
        }
        value
    }

    /// Run the proximity machine on the current tab state and publish the
    /// view. An auto-leave goes through the coordinator's leave path.
    async fn evaluate(&self) {
        let state = self.coordinator.state();
        let auto_leave = {
            let mut tracked = lock(&self.tracked);
            if tracked.follow(state.ticket) {
                tracked.state.view.acknowledge_check_in();
            }
            match state.proximity_input() {
                Some(input) => {
                    let (next, output) = step(&tracked.state, input, &self.context().thresholds);
                    for event in &output.events {
                        tracing::debug!(tab = %self.context().tab, ?event, "proximity");
                    }
                    tracked.state = next;
                    tracked.events = output.events;
                    output.auto_leave
                }
                None => None,
            }
        };

        if let Some(reason) = auto_leave {
            tracing::info!(tab = %self.context().tab, %reason, "auto-leave");
            self.coordinator.leave(reason).await;
            let mut tracked = lock(&self.tracked);
            tracked.follow(None);
            tracked.left = Some(reason);
        }
        self.publish();
    }

    fn publish(&self) {
        let state = self.coordinator.state();
        let snapshot = {
            let tracked = lock(&self.tracked);
            GuestSnapshot {
                tab: self.context().tab.clone(),
                queue: self.context().scope.clone(),
                ticket: state.ticket,
                now_serving: state.now_serving.map(|m| m.now_serving),
                queue_count: state.queue_count(),
                phase: tracked.state.phase,
                view: tracked.state.view,
                events: tracked.events.clone(),
                left: tracked.left,
            }
        };
        self.view.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
