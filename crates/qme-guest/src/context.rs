//! Per-tab context, instantiated once per page session and passed to the
//! coordinator, the session and the fabric.

use std::time::Duration;

use qme_core::{QueueScope, TabId, Thresholds};
use qme_store::{LocalStorage, SessionStorage, TicketStore};

use crate::bus::{Bus, TabBus};

/// Default interval between "now serving" polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// Default wait before re-checking storage for a sibling tab's claim.
pub const DEFAULT_RACE_GUARD: Duration = Duration::from_millis(40);

#[derive(Debug, Clone)]
pub struct GuestContext {
    pub tab: TabId,
    pub scope: QueueScope,
    pub store: TicketStore,
    /// Tab-scoped storage; only consulted for the legacy queue.
    pub session: Option<SessionStorage>,
    pub bus: Option<TabBus>,
    pub thresholds: Thresholds,
    pub poll_interval: Duration,
    pub race_guard: Duration,
}

impl GuestContext {
    /// Context for the tab owning `storage`. The legacy queue gets a fresh
    /// session storage; scoped queues get none.
    pub fn new(scope: QueueScope, storage: LocalStorage) -> Self {
        let session = scope.is_legacy().then(SessionStorage::new);
        Self {
            tab: storage.tab().clone(),
            scope,
            store: TicketStore::new(storage),
            session,
            bus: None,
            thresholds: Thresholds::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            race_guard: DEFAULT_RACE_GUARD,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionStorage) -> Self {
        self.session = Some(session);
        self
    }

    /// Join the profile's broadcast bus.
    #[must_use]
    pub fn with_bus(mut self, bus: &Bus) -> Self {
        self.bus = Some(bus.tab(self.tab.clone()));
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_race_guard(mut self, delay: Duration) -> Self {
        self.race_guard = delay;
        self
    }

    /// Session storage, if this is the legacy flow.
    pub fn legacy_session(&self) -> Option<&SessionStorage> {
        self.session.as_ref().filter(|_| self.scope.is_legacy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qme_store::Profile;

    #[test]
    fn defaults() {
        let profile = Profile::in_memory();
        let scope = QueueScope::queue("food").expect("valid queue");
        let ctx = GuestContext::new(scope, profile.local_storage(TabId::new("a")));
        assert_eq!(ctx.tab, TabId::new("a"));
        assert_eq!(ctx.poll_interval, Duration::from_secs(2));
        assert_eq!(ctx.race_guard, Duration::from_millis(40));
        assert_eq!(ctx.thresholds, Thresholds::default());
        assert!(ctx.session.is_none());
        assert!(ctx.bus.is_none());
    }

    #[test]
    fn legacy_gets_session_storage() {
        let profile = Profile::in_memory();
        let ctx = GuestContext::new(QueueScope::Legacy, profile.local_storage(TabId::new("a")));
        assert!(ctx.legacy_session().is_some());

        let scoped = GuestContext::new(
            QueueScope::queue("food").expect("valid queue"),
            profile.local_storage(TabId::new("b")),
        )
        .with_session(SessionStorage::new());
        assert!(scoped.legacy_session().is_none());
    }

    #[test]
    fn builder_overrides() {
        let profile = Profile::in_memory();
        let bus = Bus::new();
        let ctx = GuestContext::new(QueueScope::Legacy, profile.local_storage(TabId::new("a")))
            .with_bus(&bus)
            .with_poll_interval(Duration::from_millis(100))
            .with_race_guard(Duration::ZERO)
            .with_thresholds(Thresholds {
                no_check_in_bye: 2,
                ..Thresholds::default()
            });
        assert_eq!(ctx.bus.as_ref().map(|b| b.tab().clone()), Some(TabId::new("a")));
        assert_eq!(ctx.poll_interval, Duration::from_millis(100));
        assert_eq!(ctx.race_guard, Duration::ZERO);
        assert_eq!(ctx.thresholds.no_check_in_bye, 2);
    }
}
