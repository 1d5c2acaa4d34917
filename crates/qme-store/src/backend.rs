//! StorageBackend trait with in-memory and JSON-file implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// Synchronous string key-value storage. Every call may fail; callers
/// decide how to degrade.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

impl<T: StorageBackend + ?Sized> StorageBackend for &T {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Memory ───────────────────────────────────────────────────────

/// In-memory storage. Optionally limited to a number of entries, or fully
/// disabled to model private browsing contexts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    max_entries: Option<usize>,
    disabled: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// A backend on which every operation fails.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.disabled {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = lock(&self.entries);
        if let Some(max) = self.max_entries {
            if !entries.contains_key(key) && entries.len() >= max {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

// ─── JSON file ────────────────────────────────────────────────────

/// Durable storage: one JSON object per profile, rewritten atomically
/// (temp file + rename) on every mutation.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileBackend {
    /// Open (or lazily create) the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy, persist it, then commit it in memory.
    fn write_through(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let mut next = entries.clone();
        mutate(&mut next);
        if next == *entries {
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&next)?)?;
        std::fs::rename(&tmp, &self.path)?;

        *entries = next;
        Ok(())
    }
}

impl StorageBackend for JsonFileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_through(|m| {
            m.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.write_through(|m| {
            m.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
