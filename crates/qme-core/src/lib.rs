//! qme-core: guest-side queue ticket model.
//! Pure logic only: ticket/queue types, clamping rules, the versioned reply
//! adapter, the proximity state machine and the cross-channel sync reducer.
//! All IO (storage, transport, timers) lives in the other crates.

pub mod error;
pub mod metric;
pub mod proximity;
pub mod reply;
pub mod sync;
pub mod types;

pub use error::CoreError;
pub use metric::{QueueMetric, clamp_now_serving, parse_now_serving, queue_count};
pub use proximity::{
    GuestView, Notice, ProximityEvent, ProximityInput, ProximityOutput, ProximityPhase,
    ProximityState, Thresholds,
};
pub use reply::TicketReply;
pub use sync::{SyncUpdate, TabState};
pub use types::{
    IssuedTicket, LeaveReason, QueueScope, QueueSnapshot, StatusCounts, TabId, Ticket, TicketId,
    TicketNumber, TicketStatus,
};
