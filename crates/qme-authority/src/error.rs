//! Error types for remote calls to the ticket-issuing authority.

use qme_core::CoreError;
use thiserror::Error;

pub const CODE_GENERIC: i64 = -32000;
pub const CODE_NOT_FOUND: i64 = -32004;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority unreachable: {0}")]
    Transport(String),

    #[error("authority io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error(transparent)]
    Malformed(#[from] CoreError),
}

impl AuthorityError {
    pub fn method_not_found(method: &str) -> Self {
        Self::Rpc {
            code: CODE_METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::Rpc {
            code: CODE_INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Rpc {
            code: CODE_NOT_FOUND,
            message: message.into(),
        }
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Rpc { code, .. } => *code,
            _ => CODE_GENERIC,
        }
    }
}
