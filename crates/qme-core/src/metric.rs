//! "Now serving" metric: clamping, parsing and queue arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reply::integer_of;

/// Cached copy of a queue's "now serving" value, stamped with the local
/// time it was last refreshed. The authority owns the real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetric {
    pub now_serving: i64,
    pub refreshed_at: DateTime<Utc>,
}

impl QueueMetric {
    pub fn new(now_serving: i64, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            now_serving: clamp_now_serving(now_serving),
            refreshed_at,
        }
    }
}

/// "Now serving" is never below 1.
pub fn clamp_now_serving(raw: i64) -> i64 {
    raw.max(1)
}

/// Parse a "now serving" value from any JSON input.
///
/// Accepts numbers, numeric strings and `{"value": n}` / `{"now_serving": n}`
/// objects. Floats are rounded; anything non-numeric reads as 1.
pub fn parse_now_serving(value: &Value) -> i64 {
    let raw = integer_of(value)
        .or_else(|| value.get("value").and_then(integer_of))
        .or_else(|| value.get("now_serving").and_then(integer_of));
    raw.map_or(1, clamp_now_serving)
}

/// Number of guests still queued: `max(0, last_issued - now_serving + 1)`.
pub fn queue_count(last_issued: i64, now_serving: i64) -> u64 {
    let count = last_issued
        .saturating_sub(now_serving)
        .saturating_add(1)
        .max(0);
    u64::try_from(count).unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────────
