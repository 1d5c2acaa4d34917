//! qme-authority: Ticket Issuance Client.
//! Wraps the ticket-issuing authority's remote procedures behind a
//! transport-agnostic [`RpcTransport`] and normalizes every reply shape at
//! this boundary. Also ships a reference in-memory authority used by the
//! local daemon and by tests.

pub mod client;
pub mod error;
pub mod local;
pub mod state;
pub mod transport;

pub use client::IssuanceClient;
pub use error::AuthorityError;
pub use local::LocalTransport;
pub use state::{AuthorityState, PersistedState, ReplyFormat};
pub use transport::{RowChange, RpcMethod, RpcTransport};
