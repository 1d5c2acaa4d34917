//! Tab-scoped session storage (legacy single-queue flow).
//!
//! Lives and dies with one tab; never shared and never announced.

use std::sync::Arc;

use qme_core::TicketId;

use crate::backend::{MemoryBackend, StorageBackend};
use crate::error::StoreError;
use crate::keys::{LEGACY_UNSCOPED_KEY, SESSION_CHECKED_IN_KEY, SESSION_TICKET_KEY};
use crate::ticket_store::parse_ticket_id;

#[derive(Clone)]
pub struct SessionStorage {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").finish_non_exhaustive()
    }
}

impl Default for SessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::with_backend(MemoryBackend::new())
    }

    pub fn with_backend(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn ticket_id(&self) -> Option<TicketId> {
        self.read(SESSION_TICKET_KEY).as_deref().and_then(parse_ticket_id)
    }

    pub fn set_ticket_id(&self, id: TicketId) -> bool {
        self.write(SESSION_TICKET_KEY, &id.to_string())
    }

    pub fn checked_in(&self) -> bool {
        self.read(SESSION_CHECKED_IN_KEY).as_deref() == Some("1")
    }

    pub fn set_checked_in(&self) -> bool {
        self.write(SESSION_CHECKED_IN_KEY, "1")
    }

    pub fn clear(&self) {
        self.remove(SESSION_TICKET_KEY);
        self.remove(SESSION_CHECKED_IN_KEY);
    }

    /// Remove and return the unscoped legacy entry, if this tab has one.
    pub(crate) fn take_legacy_unscoped(&self) -> Option<String> {
        let value = self.read(LEGACY_UNSCOPED_KEY);
        self.remove(LEGACY_UNSCOPED_KEY);
        value
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    fn read(&self, key: &str) -> Option<String> {
        log_failure("read", key, self.backend.get_item(key)).flatten()
    }

    fn write(&self, key: &str, value: &str) -> bool {
        log_failure("write", key, self.backend.set_item(key, value)).is_some()
    }

    fn remove(&self, key: &str) {
        log_failure("remove", key, self.backend.remove_item(key));
    }
}

fn log_failure<T>(op: &str, key: &str, result: Result<T, StoreError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("session storage {op} {key} failed: {e}");
            None
        }
    }
}
