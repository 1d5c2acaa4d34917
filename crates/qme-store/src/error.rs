//! Error types for storage backends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable")]
    Unavailable,

    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
