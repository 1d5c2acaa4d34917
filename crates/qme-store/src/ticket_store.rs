//! Queue-namespaced ticket persistence on top of one tab's [`LocalStorage`].
//!
//! Every operation is infallible from the caller's point of view: storage
//! errors are logged and reported as "not persisted" (`false`) or "nothing
//! stored" (`None`).

use qme_core::{QueueScope, TabId, Ticket, TicketId, TicketNumber};

use crate::error::StoreError;
use crate::keys::{
    LEGACY_UNSCOPED_KEY, checked_in_key, number_key, queue_of_ticket_key, ticket_key,
};
use crate::profile::{LocalStorage, StorageEvents};
use crate::session::SessionStorage;

/// Result of the one-time legacy key migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// No unscoped entry existed.
    Nothing,
    /// The unscoped entry became the canonical ticket.
    Promoted(TicketId),
    /// A canonical ticket already existed; the unscoped entry was dropped.
    KeptCanonical(TicketId),
}

#[derive(Debug, Clone)]
pub struct TicketStore {
    storage: LocalStorage,
}

impl TicketStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub fn tab(&self) -> &TabId {
        self.storage.tab()
    }

    /// Storage changes made by other tabs.
    pub fn subscribe(&self) -> StorageEvents {
        self.storage.subscribe()
    }

    /// The ticket persisted for `scope`, with its check-in flag.
    pub fn get(&self, scope: &QueueScope) -> Option<Ticket> {
        let id = self.read(&ticket_key(scope)).as_deref().and_then(parse_ticket_id)?;
        Some(Ticket {
            id,
            number: self.number_or_id(scope, id),
            checked_in: self.is_checked_in(scope, id),
        })
    }

    /// Like [`get`](Self::get), but an unreadable store is an error rather
    /// than "nothing stored".
    pub fn try_get(&self, scope: &QueueScope) -> Result<Option<Ticket>, StoreError> {
        let raw = self.storage.get_item(&ticket_key(scope))?;
        Ok(raw.as_deref().and_then(parse_ticket_id).map(|id| Ticket {
            id,
            number: self.number_or_id(scope, id),
            checked_in: self.is_checked_in(scope, id),
        }))
    }

    /// Persist id and number. The number is written first so a peer reacting
    /// to the id change already finds the matching number.
    pub fn set(&self, scope: &QueueScope, id: TicketId, number: TicketNumber) -> bool {
        let number_ok = self.write(&number_key(scope), &number.to_string());
        let id_ok = self.write(&ticket_key(scope), &id.to_string());
        number_ok && id_ok
    }

    /// Remove every entry for `scope`, returning the id that was stored.
    pub fn clear(&self, scope: &QueueScope) -> Option<TicketId> {
        let stored = self.read(&ticket_key(scope)).as_deref().and_then(parse_ticket_id);
        self.remove(&ticket_key(scope));
        self.remove(&number_key(scope));
        if let Some(id) = stored {
            self.remove(&checked_in_key(scope, id));
        }
        stored
    }

    pub fn is_checked_in(&self, scope: &QueueScope, id: TicketId) -> bool {
        self.read(&checked_in_key(scope, id)).as_deref() == Some("1")
    }

    pub fn mark_checked_in(&self, scope: &QueueScope, id: TicketId) -> bool {
        self.write(&checked_in_key(scope, id), "1")
    }

    /// Display number for `id`, falling back to the id itself.
    pub fn number_or_id(&self, scope: &QueueScope, id: TicketId) -> TicketNumber {
        self.read(&number_key(scope))
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|n| *n > 0)
            .map_or_else(|| TicketNumber::from(id), TicketNumber::new)
    }

    /// Scoped queues this profile currently holds a ticket for.
    pub fn active_queue_ids(&self) -> Vec<String> {
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("listing stored tickets failed: {e}");
                return Vec::new();
            }
        };
        keys.iter()
            .filter_map(|key| {
                let queue = queue_of_ticket_key(key)?;
                self.read(key).as_deref().and_then(parse_ticket_id)?;
                Some(queue.to_string())
            })
            .collect()
    }

    /// Move the unscoped legacy entry into the legacy namespace, once.
    ///
    /// The unscoped key is looked up in local storage, then in this tab's
    /// session storage. A canonical entry always wins. The unscoped key is
    /// removed from both places either way, so a second call finds nothing.
    pub fn migrate_legacy(&self, session: Option<&SessionStorage>) -> Migration {
        let scope = QueueScope::Legacy;
        let from_local = self.read(LEGACY_UNSCOPED_KEY);
        self.remove(LEGACY_UNSCOPED_KEY);
        let from_session = session.and_then(SessionStorage::take_legacy_unscoped);

        let Some(legacy) = from_local
            .or(from_session)
            .as_deref()
            .and_then(parse_ticket_id)
        else {
            return Migration::Nothing;
        };

        if let Some(canonical) = self.read(&ticket_key(&scope)).as_deref().and_then(parse_ticket_id) {
            tracing::debug!("legacy ticket {legacy} dropped, canonical {canonical} kept");
            return Migration::KeptCanonical(canonical);
        }

        self.write(&ticket_key(&scope), &legacy.to_string());
        if self.read(&number_key(&scope)).is_none() {
            self.write(&number_key(&scope), &legacy.to_string());
        }
        tracing::info!("migrated legacy ticket {legacy}");
        Migration::Promoted(legacy)
    }

    fn read(&self, key: &str) -> Option<String> {
        log_failure("read", key, self.storage.get_item(key)).flatten()
    }

    fn write(&self, key: &str, value: &str) -> bool {
        log_failure("write", key, self.storage.set_item(key, value)).is_some()
    }

    fn remove(&self, key: &str) {
        log_failure("remove", key, self.storage.remove_item(key));
    }
}

/// Parse a stored ticket id; anything that is not a positive integer is
/// treated as absent.
pub fn parse_ticket_id(raw: &str) -> Option<TicketId> {
    raw.trim().parse::<i64>().ok().and_then(TicketId::new)
}

fn log_failure<T>(op: &str, key: &str, result: Result<T, StoreError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("ticket storage {op} {key} failed, continuing without persistence: {e}");
            None
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
