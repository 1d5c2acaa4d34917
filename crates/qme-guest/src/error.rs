use qme_authority::AuthorityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimError {
    /// The authority did not issue a ticket. Nothing was stored; retry is safe.
    #[error("claim failed: {0}")]
    Authority(#[from] AuthorityError),
}
