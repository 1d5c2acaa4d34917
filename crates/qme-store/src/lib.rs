//! qme-store: Local Ticket Store.
//! Per-profile key-value persistence for the guest's tickets, storage-change
//! notifications between tabs of one profile, tab-scoped session storage and
//! the one-time migration of the unscoped legacy key.
//!
//! Storage failures never escape [`TicketStore`]: they degrade to "ticket not
//! persisted" with a warning.

pub mod backend;
pub mod error;
pub mod keys;
pub mod profile;
pub mod session;
pub mod ticket_store;

pub use backend::{JsonFileBackend, MemoryBackend, StorageBackend};
pub use error::StoreError;
pub use keys::KeyKind;
pub use profile::{LocalStorage, Profile, StorageEvent, StorageEvents};
pub use session::SessionStorage;
pub use ticket_store::{Migration, TicketStore};
