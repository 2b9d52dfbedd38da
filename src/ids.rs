// src/ids.rs
// Identifier and clock helpers shared across the runtime.

use chrono::Utc;
use uuid::Uuid;

/// Opaque 32-char hex identifier used for conversations, streams, and bubbles.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// RFC 3339 timestamp stamped onto bubbles when they are bound to a session.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Current time in milliseconds, the unit of `updatedAt` in conversation summaries.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
