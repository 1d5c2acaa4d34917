//! Versioned reply adapter for the ticket-issuing authority.
//!
//! The authority answers ticket calls in one of two shapes depending on its
//! migration state:
//!
//! - legacy: a bare integer, where id and display number are identical
//! - structured: `{"id": .., "ticket_number": ..}`
//!
//! Everything downstream of this module only sees [`IssuedTicket`].

use serde_json::Value;

use crate::error::CoreError;
use crate::types::{IssuedTicket, TicketId, TicketNumber};

/// Raw shape of a claim/restore reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketReply {
    Scalar(i64),
    Structured {
        id: Option<i64>,
        ticket_number: Option<i64>,
    },
    Unrecognized,
}

impl TicketReply {
    pub fn parse(value: &Value) -> Self {
        if let Some(n) = integer_of(value) {
            return Self::Scalar(n);
        }
        match value {
            Value::Object(map) => Self::Structured {
                id: map.get("id").and_then(integer_of),
                ticket_number: map
                    .get("ticket_number")
                    .or_else(|| map.get("ticketNumber"))
                    .and_then(integer_of),
            },
            _ => Self::Unrecognized,
        }
    }
}

/// Normalize a claim reply. Fails only when no usable id can be found:
/// a ticket is never fabricated locally.
pub fn normalize_claim(value: &Value) -> Result<IssuedTicket, CoreError> {
    match TicketReply::parse(value) {
        TicketReply::Scalar(n) => {
            let id = TicketId::new(n)
                .ok_or_else(|| CoreError::MalformedReply(format!("non-positive ticket id {n}")))?;
            Ok(IssuedTicket {
                id,
                number: TicketNumber::from(id),
            })
        }
        TicketReply::Structured { id, ticket_number } => {
            let id = id
                .and_then(TicketId::new)
                .ok_or_else(|| CoreError::MalformedReply(format!("claim reply without id: {value}")))?;
            let number = ticket_number.map_or_else(|| TicketNumber::from(id), TicketNumber::new);
            Ok(IssuedTicket { id, number })
        }
        TicketReply::Unrecognized => Err(CoreError::MalformedReply(value.to_string())),
    }
}

/// Normalize a restore reply. Never fails: missing parts fall back to what
/// the caller already holds.
///
/// A legacy scalar reply carries the display number; the id is the one that
/// was restored.
pub fn normalize_restore(value: &Value, requested: TicketId, held: TicketNumber) -> IssuedTicket {
    match TicketReply::parse(value) {
        TicketReply::Scalar(n) => IssuedTicket {
            id: requested,
            number: TicketNumber::new(n),
        },
        TicketReply::Structured { id, ticket_number } => IssuedTicket {
            id: id.and_then(TicketId::new).unwrap_or(requested),
            number: ticket_number.map_or(held, TicketNumber::new),
        },
        TicketReply::Unrecognized => IssuedTicket {
            id: requested,
            number: held,
        },
    }
}

/// Normalize a counter reply (`peek`, lost count). Unknown shapes read as 0.
pub fn normalize_count(value: &Value) -> i64 {
    integer_of(value)
        .or_else(|| value.get("value").and_then(integer_of))
        .or_else(|| value.get("counter").and_then(integer_of))
        .unwrap_or(0)
        .max(0)
}

/// Read an integer out of a JSON number or numeric string.
///
/// Floats are rounded half away from zero; non-finite values are rejected.
pub fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.round() as i64)
            })
        }
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
