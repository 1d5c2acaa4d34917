use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unknown leave reason: {0}")]
    UnknownLeaveReason(String),

    #[error("unknown ticket status: {0}")]
    UnknownTicketStatus(String),

    #[error("invalid queue id: {0:?}")]
    InvalidQueueId(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),
}
