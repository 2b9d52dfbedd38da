//! Session store and per-user conversation index.
//!
//! Both are keyed in-memory registries. The store hands out shared sessions,
//! created lazily and kept for the life of the process. The index is
//! deliberately independent of the store: streaming never updates it;
//! handlers that want stable conversation lists call
//! `set_conversation_list` themselves, typically from `on_new_chat`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::session::Session;

/// User id applied when the `User-Id` header is missing or blank.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Trims the raw header value; blank collapses to [`ANONYMOUS_USER`].
pub fn normalize_user_id(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => ANONYMOUS_USER.to_string(),
    }
}

/// conversation id → session. `get_or_create` is the only entry point for
/// streaming; there is no eviction.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, conversation_id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().get(conversation_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .entry(conversation_id.to_string())
            .or_insert_with(|| Session::new(conversation_id.to_string()))
            .clone()
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(conversation_id).cloned()
    }
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl ConversationSummary {
    /// Validated constructor for index entries.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        updated_at: i64,
    ) -> Result<Self, RuntimeError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "conversation entry needs a non-empty id".to_string(),
            ));
        }
        if updated_at < 0 {
            return Err(RuntimeError::InvalidConfig(
                "conversation entry updatedAt must be a millisecond timestamp".to_string(),
            ));
        }
        Ok(Self {
            id,
            title: title.into(),
            updated_at,
        })
    }
}

/// normalized user id → ordered conversation summaries.
#[derive(Default)]
pub struct ConversationIndex {
    entries: RwLock<HashMap<String, Vec<ConversationSummary>>>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy of `entries` under the normalized user id, replacing
    /// whatever was there. Insertion order is preserved verbatim.
    pub fn set(&self, user_id: &str, entries: Vec<ConversationSummary>) {
        let user = normalize_user_id(Some(user_id));
        self.entries.write().insert(user, entries);
    }

    /// Snapshot of the user's list; empty when the user is unknown.
    pub fn get(&self, user_id: &str) -> Vec<ConversationSummary> {
        let user = normalize_user_id(Some(user_id));
        self.entries.read().get(&user).cloned().unwrap_or_default()
    }
}
