//! A storage profile shared by every tab of one guest, with change events.
//!
//! Writes through a tab's [`LocalStorage`] handle are stamped with that tab's
//! id. A change is announced only when the stored value actually changes,
//! and [`StorageEvents`] never yields a tab's own writes back to it.

use std::sync::Arc;

use qme_core::TabId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::backend::{MemoryBackend, StorageBackend};
use crate::error::StoreError;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub origin: TabId,
}

#[derive(Clone)]
pub struct Profile {
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl Profile {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn StorageBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { backend, events }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Storage handle for one tab.
    pub fn local_storage(&self, tab: TabId) -> LocalStorage {
        LocalStorage {
            profile: self.clone(),
            tab,
        }
    }
}

/// One tab's view of the shared profile storage.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    profile: Profile,
    tab: TabId,
}

impl LocalStorage {
    pub fn tab(&self) -> &TabId {
        &self.tab
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.profile.backend.get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let old_value = self.profile.backend.get_item(key)?;
        self.profile.backend.set_item(key, value)?;
        if old_value.as_deref() != Some(value) {
            self.announce(key, old_value, Some(value.to_string()));
        }
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let old_value = self.profile.backend.get_item(key)?;
        self.profile.backend.remove_item(key)?;
        if old_value.is_some() {
            self.announce(key, old_value, None);
        }
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.profile.backend.keys()
    }

    /// Changes made by other tabs of this profile.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            rx: self.profile.events.subscribe(),
            tab: self.tab.clone(),
        }
    }

    fn announce(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        let event = StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.tab.clone(),
        };
        // No receivers is fine: nobody else has the profile open.
        let _ = self.profile.events.send(event);
    }
}

/// Receiver of storage changes made by *other* tabs.
#[derive(Debug)]
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    tab: TabId,
}

impl StorageEvents {
    pub async fn recv(&mut self) -> Result<StorageEvent, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.origin != self.tab {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<StorageEvent, TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if event.origin != self.tab {
                return Ok(event);
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
