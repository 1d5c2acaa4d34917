//! Claim Coordinator: decides whether a tab adopts a stored ticket or asks
//! the authority for a new one, and owns the tab's check-in and leave paths.
//!
//! Entered once per mount:
//!
//! 1. adopt the canonical stored ticket, then `restore` it best-effort
//! 2. (legacy only) adopt and promote the tab's session ticket
//! 3. wait the race-guard delay and re-check storage for a sibling's claim
//! 4. claim a fresh ticket and persist it
//!
//! A busy flag allows one claim in flight per tab. Across tabs the race
//! guard makes double claims unlikely, not impossible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use qme_authority::{IssuanceClient, RpcTransport};
use qme_core::{LeaveReason, SyncUpdate, TabState, Ticket, TicketId};
use qme_store::Migration;

use crate::bus::BusMessage;
use crate::context::GuestContext;
use crate::error::ClaimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The tab already held a ticket in memory.
    Held(Ticket),
    /// Adopted the ticket found in storage.
    Adopted(Ticket),
    /// Promoted the tab's session ticket (legacy flow).
    Promoted(Ticket),
    /// A sibling tab published a ticket during the race guard.
    Joined(Ticket),
    /// Minted by the authority.
    Claimed(Ticket),
    /// Another claim is in flight; carries whatever the tab holds now.
    Busy(Option<Ticket>),
}

impl ClaimOutcome {
    pub fn ticket(&self) -> Option<Ticket> {
        match *self {
            Self::Held(t) | Self::Adopted(t) | Self::Promoted(t) | Self::Joined(t) | Self::Claimed(t) => {
                Some(t)
            }
            Self::Busy(t) => t,
        }
    }
}

/// Resets the busy flag on drop, including when a claim future is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ClaimCoordinator<T> {
    ctx: GuestContext,
    client: IssuanceClient<T>,
    state: Mutex<TabState>,
    /// Last ticket id seen in (or written to) shared storage.
    stored: Mutex<Option<TicketId>>,
    busy: AtomicBool,
}

impl<T> std::fmt::Debug for ClaimCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCoordinator")
            .field("tab", &self.ctx.tab)
            .field("scope", &self.ctx.scope)
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: RpcTransport> ClaimCoordinator<T> {
    /// Build the coordinator. Nothing is read from storage until [`claim`].
    ///
    /// [`claim`]: ClaimCoordinator::claim
    pub fn new(ctx: GuestContext, client: IssuanceClient<T>) -> Self {
        Self {
            ctx,
            client,
            state: Mutex::new(TabState::default()),
            stored: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &GuestContext {
        &self.ctx
    }

    pub fn client(&self) -> &IssuanceClient<T> {
        &self.client
    }

    pub fn state(&self) -> TabState {
        lock(&self.state).clone()
    }

    pub fn ticket(&self) -> Option<Ticket> {
        lock(&self.state).ticket
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Feed one update from any channel into the tab state.
    pub fn apply(&self, update: SyncUpdate) -> bool {
        lock(&self.state).apply(update, Utc::now())
    }

    // ─── Claim ────────────────────────────────────────────────────────

    pub async fn claim(&self) -> Result<ClaimOutcome, ClaimError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            tracing::debug!(tab = %self.ctx.tab, "claim already in flight");
            return Ok(ClaimOutcome::Busy(self.ticket()));
        };
        let scope = &self.ctx.scope;

        if let Some(held) = self.ticket() {
            return Ok(ClaimOutcome::Held(held));
        }

        if scope.is_legacy() {
            if let Migration::Promoted(id) = self.ctx.store.migrate_legacy(self.ctx.session.as_ref()) {
                tracing::info!(tab = %self.ctx.tab, "promoted unscoped legacy ticket {id}");
            }
        }

        // 1. Adopt canonical
        if let Some(ticket) = self.ctx.store.get(scope) {
            tracing::info!(tab = %self.ctx.tab, queue = %scope, "adopted stored ticket {}", ticket.id);
            *lock(&self.stored) = Some(ticket.id);
            let ticket = self.adopt(ticket);
            let ticket = self.restore(ticket).await;
            return Ok(ClaimOutcome::Adopted(ticket));
        }

        // 2. Session fallback (legacy)
        if let Some(ticket) = self.session_ticket() {
            tracing::info!(tab = %self.ctx.tab, "promoted session ticket {}", ticket.id);
            self.persist(ticket);
            let ticket = self.adopt(ticket);
            let ticket = self.restore(ticket).await;
            return Ok(ClaimOutcome::Promoted(ticket));
        }

        // 3. Race guard
        tokio::time::sleep(self.ctx.race_guard).await;
        if let Some(ticket) = self.ctx.store.get(scope) {
            tracing::info!(tab = %self.ctx.tab, "joined sibling's ticket {}", ticket.id);
            *lock(&self.stored) = Some(ticket.id);
            return Ok(ClaimOutcome::Joined(self.adopt(ticket)));
        }

        // 4. Fresh claim
        let issued = self.client.claim(scope).await?;
        let ticket = Ticket::from(issued);
        self.persist(ticket);
        // A ticket adopted while the claim was in flight is overwritten.
        self.apply(SyncUpdate::TicketAdopted { ticket });
        {
            let mut state = lock(&self.state);
            let last = state.last_issued.max(ticket.number.get());
            state.apply(SyncUpdate::LastIssued { value: last }, Utc::now());
        }
        tracing::info!(
            tab = %self.ctx.tab,
            queue = %scope,
            "claimed ticket {} (number {})",
            ticket.id,
            ticket.number
        );
        Ok(ClaimOutcome::Claimed(ticket))
    }

    fn session_ticket(&self) -> Option<Ticket> {
        let session = self.ctx.legacy_session()?;
        let id = session.ticket_id()?;
        let mut ticket = Ticket::new(id, self.ctx.store.number_or_id(&self.ctx.scope, id));
        ticket.checked_in = session.checked_in();
        Some(ticket)
    }

    /// Write a ticket to canonical storage (and the legacy session).
    fn persist(&self, ticket: Ticket) {
        let scope = &self.ctx.scope;
        let mut stored = self.ctx.store.set(scope, ticket.id, ticket.number);
        if ticket.checked_in {
            stored &= self.ctx.store.mark_checked_in(scope, ticket.id);
        }
        if let Some(session) = self.ctx.legacy_session() {
            session.set_ticket_id(ticket.id);
            if ticket.checked_in {
                session.set_checked_in();
            }
        }
        if stored {
            *lock(&self.stored) = Some(ticket.id);
        } else {
            tracing::warn!(tab = %self.ctx.tab, "ticket {} held in memory only", ticket.id);
        }
    }

    fn adopt(&self, ticket: Ticket) -> Ticket {
        let mut state = lock(&self.state);
        state.apply(SyncUpdate::TicketAdopted { ticket }, Utc::now());
        state.ticket.unwrap_or(ticket)
    }

    /// Re-register a held ticket with the authority. Failure keeps the
    /// local ticket; a corrected number from the authority is adopted.
    async fn restore(&self, ticket: Ticket) -> Ticket {
        let scope = &self.ctx.scope;
        match self.client.restore(scope, ticket.id, ticket.number).await {
            Ok(issued) if issued.id == ticket.id && issued.number != ticket.number => {
                tracing::info!(
                    tab = %self.ctx.tab,
                    "authority renumbered ticket {} to {}",
                    ticket.id,
                    issued.number
                );
                self.ctx.store.set(scope, ticket.id, issued.number);
                self.adopt(Ticket {
                    number: issued.number,
                    ..ticket
                })
            }
            Ok(_) => ticket,
            Err(e) => {
                tracing::warn!(tab = %self.ctx.tab, "restore of ticket {} failed: {e}", ticket.id);
                ticket
            }
        }
    }

    // ─── Check-in / leave ─────────────────────────────────────────────

    /// Check in the held ticket. Local state and storage change first; the
    /// authority is told best-effort. Returns `false` (and does nothing)
    /// when there is no ticket or it is already checked in.
    pub async fn check_in(&self) -> bool {
        let ticket = {
            let mut state = lock(&self.state);
            match state.ticket {
                Some(t) if !t.checked_in => {
                    state.apply(SyncUpdate::CheckedIn { ticket_id: t.id }, Utc::now());
                    t
                }
                _ => return false,
            }
        };
        let scope = &self.ctx.scope;

        if !self.ctx.store.mark_checked_in(scope, ticket.id) {
            tracing::warn!(tab = %self.ctx.tab, "check-in of {} not persisted", ticket.id);
        }
        if let Some(session) = self.ctx.legacy_session() {
            session.set_checked_in();
        }
        self.publish(BusMessage::CheckedIn {
            queue: scope.clone(),
            ticket_id: ticket.id,
        });

        if let Err(e) = self.client.check_in(ticket.id).await {
            tracing::warn!(tab = %self.ctx.tab, "check-in of {} not recorded remotely: {e}", ticket.id);
        }
        true
    }

    /// Leave the queue. Local state is cleared and peers are notified
    /// whether or not the authority call succeeds. Returns the ticket left.
    ///
    /// When a sibling tab already removed the ticket from shared storage it
    /// also told the authority, so the remote call is skipped.
    pub async fn leave(&self, reason: LeaveReason) -> Option<TicketId> {
        let Some(cleared) = self.clear_local() else {
            tracing::debug!(tab = %self.ctx.tab, "leave without a ticket");
            return None;
        };
        let id = cleared.id;
        self.publish(BusMessage::TicketCleared {
            queue: self.ctx.scope.clone(),
            ticket_id: Some(id),
        });
        if cleared.by_sibling {
            tracing::debug!(tab = %self.ctx.tab, "ticket {id} already left by a sibling tab");
            return Some(id);
        }
        tracing::info!(tab = %self.ctx.tab, %reason, "left queue with ticket {id}");

        if let Err(e) = self.client.leave(id, reason).await {
            tracing::warn!(tab = %self.ctx.tab, "leave of {id} not recorded remotely: {e}");
        }
        Some(id)
    }

    /// Operator reset of this tab: forget the ticket without telling the
    /// authority, and clear every sibling tab too.
    pub fn nuke(&self) -> Option<TicketId> {
        let id = self.clear_local().map(|cleared| cleared.id);
        self.publish(BusMessage::TicketCleared {
            queue: self.ctx.scope.clone(),
            ticket_id: None,
        });
        tracing::info!(tab = %self.ctx.tab, "local ticket state nuked");
        id
    }

    fn clear_local(&self) -> Option<Cleared> {
        let held = {
            let mut state = lock(&self.state);
            let held = state.ticket.map(|t| t.id);
            state.apply(SyncUpdate::TicketCleared { ticket_id: None }, Utc::now());
            held
        };
        let last_stored = lock(&self.stored).take();
        let stored = self.ctx.store.clear(&self.ctx.scope);
        if let Some(session) = self.ctx.legacy_session() {
            session.clear();
        }
        let id = held.or(stored)?;
        Some(Cleared {
            id,
            by_sibling: stored.is_none() && last_stored == Some(id),
        })
    }

    fn publish(&self, message: BusMessage) {
        if let Some(bus) = &self.ctx.bus {
            bus.publish(message);
        }
    }

    // ─── Polling ──────────────────────────────────────────────────────

    /// Re-read shared storage, then re-fetch "now serving" and the last
    /// issued number. A failed read keeps the last good value.
    pub async fn refresh(&self) -> bool {
        let scope = &self.ctx.scope;
        let mut changed = self.resync();
        match self.client.now_serving(scope).await {
            Ok(value) => changed |= self.apply(SyncUpdate::NowServing { value }),
            Err(e) => tracing::warn!(tab = %self.ctx.tab, "now-serving poll failed: {e}"),
        }
        match self.client.peek(scope).await {
            Ok(value) => changed |= self.apply(SyncUpdate::LastIssued { value }),
            Err(e) => tracing::warn!(tab = %self.ctx.tab, "peek failed: {e}"),
        }
        changed
    }

    /// Catch up with shared storage after a missed storage event. A ticket
    /// that never reached storage (disabled or full) is kept.
    pub fn resync(&self) -> bool {
        let stored = match self.ctx.store.try_get(&self.ctx.scope) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::debug!(tab = %self.ctx.tab, "storage unreadable, keeping held ticket: {e}");
                return false;
            }
        };
        let mut last_stored = lock(&self.stored);
        match stored {
            Some(ticket) => {
                *last_stored = Some(ticket.id);
                drop(last_stored);
                self.apply(SyncUpdate::TicketAdopted { ticket })
            }
            None => {
                let Some(held) = self.ticket().map(|t| t.id) else {
                    return false;
                };
                if *last_stored != Some(held) {
                    return false;
                }
                *last_stored = None;
                drop(last_stored);
                tracing::info!(tab = %self.ctx.tab, "ticket {held} cleared by a sibling tab");
                self.apply(SyncUpdate::TicketCleared { ticket_id: Some(held) })
            }
        }
    }
}

/// What [`ClaimCoordinator::clear_local`] removed.
struct Cleared {
    id: TicketId,
    /// Shared storage was already empty: a sibling cleared it first.
    by_sibling: bool,
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use qme_authority::{AuthorityState, LocalTransport, ReplyFormat};
    use qme_core::{QueueScope, TabId, TicketNumber};
    use qme_store::{MemoryBackend, Profile, SessionStorage, TicketStore};

    use crate::bus::Bus;

    fn food() -> QueueScope {
        QueueScope::queue("food").expect("valid queue")
    }

    fn id(n: i64) -> TicketId {
        TicketId::new(n).expect("positive")
    }

    fn coordinator(
        profile: &Profile,
        tab: &str,
        scope: QueueScope,
        transport: &LocalTransport,
    ) -> ClaimCoordinator<LocalTransport> {
        let ctx = GuestContext::new(scope, profile.local_storage(TabId::new(tab)));
        ClaimCoordinator::new(ctx, IssuanceClient::new(transport.clone()))
    }

    fn store(profile: &Profile) -> TicketStore {
        TicketStore::new(profile.local_storage(TabId::new("test")))
    }

    #[tokio::test]
    async fn fresh_claim_persists() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);

        let outcome = c.claim().await.expect("claim");
        let ClaimOutcome::Claimed(ticket) = outcome else {
            panic!("expected fresh claim, got {outcome:?}");
        };
        assert_eq!(store(&profile).get(&food()), Some(ticket));
        assert_eq!(c.ticket(), Some(ticket));
        assert_eq!(c.state().last_issued, ticket.number.get());
    }

    #[tokio::test]
    async fn concurrent_claims_make_one_call() {
        let profile = Profile::in_memory();
        let transport =
            LocalTransport::with_latency(AuthorityState::default(), Duration::from_millis(20));
        let c = coordinator(&profile, "a", food(), &transport);

        let (first, second) = tokio::join!(c.claim(), c.claim());
        let outcomes = [first.expect("first"), second.expect("second")];
        assert_eq!(
            outcomes.iter().filter(|o| matches!(o, ClaimOutcome::Claimed(_))).count(),
            1
        );
        assert!(outcomes.iter().any(|o| matches!(o, ClaimOutcome::Busy(None))));
        assert_eq!(transport.count_calls("next_ticket_for_queue"), 1);
        assert!(!c.is_busy());

        // Sequential re-entry returns the held ticket.
        assert!(matches!(c.claim().await.expect("again"), ClaimOutcome::Held(_)));
        assert_eq!(transport.count_calls("next_ticket_for_queue"), 1);
    }

    #[tokio::test]
    async fn adopting_stored_ticket_never_claims() {
        let profile = Profile::in_memory();
        store(&profile).set(&food(), id(41), TicketNumber::new(3));
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);

        let outcome = c.claim().await.expect("claim");
        assert!(matches!(outcome, ClaimOutcome::Adopted(t) if t.id == id(41)));
        assert_eq!(transport.count_calls("next_ticket_for_queue"), 0);
        assert_eq!(transport.count_calls("restore_ticket_for_queue"), 1);
    }

    #[tokio::test]
    async fn adoption_survives_restore_failure() {
        let profile = Profile::in_memory();
        store(&profile).set(&food(), id(41), TicketNumber::new(3));
        let transport = LocalTransport::default();
        transport.set_offline(true);
        let c = coordinator(&profile, "a", food(), &transport);

        let outcome = c.claim().await.expect("adoption needs no network");
        assert_eq!(outcome.ticket().map(|t| t.number.get()), Some(3));
    }

    #[tokio::test]
    async fn restore_after_authority_restart() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let first = coordinator(&profile, "a", food(), &transport);
        let held = first.claim().await.expect("claim").ticket().expect("ticket");

        transport.restart_cold();
        let reloaded = coordinator(&profile, "b", food(), &transport);
        reloaded.claim().await.expect("adopt");

        let other = Profile::in_memory();
        let stranger = coordinator(&other, "c", food(), &transport);
        let fresh = stranger.claim().await.expect("claim").ticket().expect("ticket");
        assert!(fresh.id > held.id);
        assert!(fresh.number > held.number);
    }

    #[tokio::test]
    async fn authority_renumbering_is_adopted() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let issuer = coordinator(&Profile::in_memory(), "x", food(), &transport);
        let issued = issuer.claim().await.expect("claim").ticket().expect("ticket");

        // Stale cached number for a ticket the authority still knows.
        store(&profile).set(&food(), issued.id, TicketNumber::new(9));
        let c = coordinator(&profile, "a", food(), &transport);
        let adopted = c.claim().await.expect("adopt").ticket().expect("ticket");
        assert_eq!(adopted.number, issued.number);
        assert_eq!(store(&profile).get(&food()).map(|t| t.number), Some(issued.number));
    }

    #[tokio::test]
    async fn claim_failure_allows_retry() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);

        transport.set_offline(true);
        assert!(matches!(c.claim().await, Err(ClaimError::Authority(_))));
        assert_eq!(c.ticket(), None);
        assert_eq!(store(&profile).get(&food()), None);
        assert!(!c.is_busy());

        transport.set_offline(false);
        assert!(matches!(c.claim().await.expect("retry"), ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn sibling_claim_is_joined_during_race_guard() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let sibling_store = store(&profile);
        let c = coordinator(&profile, "a", food(), &transport);

        let sibling = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            sibling_store.set(&food(), id(77), TicketNumber::new(4));
        };
        let (outcome, ()) = tokio::join!(c.claim(), sibling);
        assert!(matches!(outcome.expect("claim"), ClaimOutcome::Joined(t) if t.id == id(77)));
        assert_eq!(transport.count_calls("next_ticket_for_queue"), 0);
    }

    #[tokio::test]
    async fn two_tabs_opened_together_share_one_ticket() {
        let profile = Profile::in_memory();
        let transport =
            LocalTransport::with_latency(AuthorityState::default(), Duration::from_millis(1));
        let a = coordinator(&profile, "a", food(), &transport);
        let b_ctx = GuestContext::new(food(), profile.local_storage(TabId::new("b")))
            .with_race_guard(Duration::from_millis(200));
        let b = ClaimCoordinator::new(b_ctx, IssuanceClient::new(transport.clone()));

        let (ra, rb) = tokio::join!(a.claim(), b.claim());
        let ta = ra.expect("a").ticket().expect("a ticket");
        let tb = rb.expect("b").ticket().expect("b ticket");
        assert_eq!(ta, tb);
        assert_eq!(transport.count_calls("next_ticket_for_queue"), 1);
    }

    #[tokio::test]
    async fn legacy_session_fallback_promotes() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::new(AuthorityState::new(ReplyFormat::Legacy));
        let session = SessionStorage::new();
        session.set_ticket_id(id(12));
        session.set_checked_in();
        let ctx = GuestContext::new(QueueScope::Legacy, profile.local_storage(TabId::new("a")))
            .with_session(session);
        let c = ClaimCoordinator::new(ctx, IssuanceClient::new(transport.clone()));

        let outcome = c.claim().await.expect("claim");
        let ClaimOutcome::Promoted(ticket) = outcome else {
            panic!("expected promotion, got {outcome:?}");
        };
        assert_eq!(ticket.id, id(12));
        assert!(ticket.checked_in);
        let canonical = store(&profile).get(&QueueScope::Legacy).expect("promoted");
        assert_eq!(canonical.id, id(12));
        assert!(canonical.checked_in);
        assert_eq!(transport.count_calls("next_ticket"), 0);
        assert_eq!(transport.count_calls("restore_ticket"), 1);
    }

    #[tokio::test]
    async fn legacy_claim_writes_session_too() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::new(AuthorityState::new(ReplyFormat::Legacy));
        let session = SessionStorage::new();
        let ctx = GuestContext::new(QueueScope::Legacy, profile.local_storage(TabId::new("a")))
            .with_session(session.clone())
            .with_race_guard(Duration::ZERO);
        let c = ClaimCoordinator::new(ctx, IssuanceClient::new(transport));

        let ticket = c.claim().await.expect("claim").ticket().expect("ticket");
        assert_eq!(ticket.id.get(), ticket.number.get());
        assert_eq!(session.ticket_id(), Some(ticket.id));
    }

    #[tokio::test]
    async fn check_in_is_idempotent() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);
        assert!(!c.check_in().await, "no ticket yet");

        let ticket = c.claim().await.expect("claim").ticket().expect("ticket");
        assert!(c.check_in().await);
        assert!(!c.check_in().await);
        assert_eq!(transport.count_calls("check_in_ticket"), 1);
        assert!(store(&profile).is_checked_in(&food(), ticket.id));
    }

    #[tokio::test]
    async fn concurrent_check_ins_make_one_call() {
        let profile = Profile::in_memory();
        let transport =
            LocalTransport::with_latency(AuthorityState::default(), Duration::from_millis(5));
        let c = coordinator(&profile, "a", food(), &transport);
        c.claim().await.expect("claim");

        let (a, b) = tokio::join!(c.check_in(), c.check_in());
        assert!(a ^ b);
        assert_eq!(transport.count_calls("check_in_ticket"), 1);
    }

    #[tokio::test]
    async fn check_in_survives_authority_outage() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);
        c.claim().await.expect("claim");

        transport.set_offline(true);
        assert!(c.check_in().await);
        assert_eq!(c.ticket().map(|t| t.checked_in), Some(true));
    }

    #[tokio::test]
    async fn leave_clears_everything_even_offline() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let bus = Bus::new();
        let ctx = GuestContext::new(food(), profile.local_storage(TabId::new("a"))).with_bus(&bus);
        let c = ClaimCoordinator::new(ctx, IssuanceClient::new(transport.clone()));
        let mut peer = bus.tab(TabId::new("b")).subscribe();

        let ticket = c.claim().await.expect("claim").ticket().expect("ticket");
        c.check_in().await;
        transport.set_offline(true);

        assert_eq!(c.leave(LeaveReason::User).await, Some(ticket.id));
        assert_eq!(c.ticket(), None);
        let s = store(&profile);
        assert_eq!(s.get(&food()), None);
        assert!(!s.is_checked_in(&food(), ticket.id));

        let mut cleared = false;
        while let Ok(msg) = peer.try_recv() {
            cleared |= msg
                == BusMessage::TicketCleared {
                    queue: food(),
                    ticket_id: Some(ticket.id),
                };
        }
        assert!(cleared);
        assert_eq!(c.leave(LeaveReason::User).await, None);
    }

    #[tokio::test]
    async fn nuke_skips_authority() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);
        let ticket = c.claim().await.expect("claim").ticket().expect("ticket");

        assert_eq!(c.nuke(), Some(ticket.id));
        assert_eq!(c.ticket(), None);
        assert_eq!(transport.count_calls("leave_queue"), 0);
    }

    #[tokio::test]
    async fn disabled_storage_still_holds_ticket_in_memory() {
        let profile = Profile::new(MemoryBackend::disabled());
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);

        let ticket = c.claim().await.expect("claim").ticket().expect("ticket");
        assert_eq!(c.ticket(), Some(ticket));
        assert!(!c.resync());
        assert_eq!(c.ticket(), Some(ticket));
        assert!(c.check_in().await);
        assert_eq!(c.leave(LeaveReason::User).await, Some(ticket.id));
        assert_eq!(transport.count_calls("leave_queue"), 1);
    }

    #[tokio::test]
    async fn ticket_that_never_reached_storage_survives_resync() {
        let profile = Profile::new(MemoryBackend::new().with_max_entries(1));
        let transport = LocalTransport::default();
        let c = coordinator(&profile, "a", food(), &transport);

        let ticket = c.claim().await.expect("claim").ticket().expect("ticket");
        assert_eq!(store(&profile).get(&food()), None);
        assert!(!c.resync());
        assert_eq!(c.ticket(), Some(ticket));
    }

    #[tokio::test]
    async fn resync_follows_sibling_storage() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let a = coordinator(&profile, "a", food(), &transport);
        let b = coordinator(&profile, "b", food(), &transport);
        let held = a.claim().await.expect("claim").ticket().expect("ticket");
        b.claim().await.expect("adopt");

        a.check_in().await;
        assert!(b.resync());
        assert_eq!(b.ticket().map(|t| t.checked_in), Some(true));

        a.nuke();
        assert!(b.resync());
        assert_eq!(b.ticket(), None);
        assert!(!b.resync());

        // A sibling's fresh claim is adopted on the next read.
        let next = a.claim().await.expect("claim").ticket().expect("ticket");
        assert_ne!(next.id, held.id);
        assert!(b.resync());
        assert_eq!(b.ticket().map(|t| t.id), Some(next.id));
    }

    #[tokio::test]
    async fn sibling_leave_is_not_repeated_remotely() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let a = coordinator(&profile, "a", food(), &transport);
        let b = coordinator(&profile, "b", food(), &transport);
        let held = a.claim().await.expect("claim").ticket().expect("ticket");
        b.claim().await.expect("adopt");

        assert_eq!(a.leave(LeaveReason::NoCheckInTimeout).await, Some(held.id));
        assert_eq!(b.leave(LeaveReason::NoCheckInTimeout).await, Some(held.id));
        assert_eq!(b.ticket(), None);
        assert_eq!(transport.count_calls("leave_queue"), 1);
    }

    #[tokio::test]
    async fn refresh_keeps_last_good_value() {
        let profile = Profile::in_memory();
        let transport = LocalTransport::default();
        let admin = IssuanceClient::new(transport.clone());
        admin.set_now_serving(&food(), 4).await.expect("set");
        let c = coordinator(&profile, "a", food(), &transport);

        assert!(c.refresh().await);
        assert_eq!(c.state().now_serving.map(|m| m.now_serving), Some(4));

        transport.set_offline(true);
        assert!(!c.refresh().await);
        assert_eq!(c.state().now_serving.map(|m| m.now_serving), Some(4));
    }
}
