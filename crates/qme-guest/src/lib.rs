//! qme-guest: one tab's ticket lifecycle.
//!
//! [`GuestContext`] carries everything a tab needs (queue scope, storage,
//! bus, thresholds, timings). [`ClaimCoordinator`] adopts or claims the
//! ticket, [`GuestSession`] drives the proximity machine from it, and
//! [`fabric::spawn`] feeds both from polling, the same-device bus, storage
//! events and realtime push.

pub mod bus;
pub mod claim;
pub mod context;
pub mod error;
pub mod fabric;
pub mod session;

pub use bus::{Bus, BusMessage, BusReceiver, TabBus};
pub use claim::{ClaimCoordinator, ClaimOutcome};
pub use context::GuestContext;
pub use error::ClaimError;
pub use session::{GuestSession, GuestSnapshot};
