//! Runtime: the shared state one bubble server runs on.
//!
//! Owns the session store, the conversation index, the handler registry,
//! and the live-stream registry. There is no process-global state; every
//! `Runtime` is independent, so tests can run several servers (and many
//! concurrent streams) in one process.

use std::sync::Arc;

use axum::Router;

use crate::controller::{ActiveStreams, StreamTimeouts};
use crate::registry::{HandlerRegistry, HistoryHandler, MessageHandler, NewChatHandler};
use crate::server;
use crate::store::{ConversationIndex, ConversationSummary, SessionStore};

#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub store: SessionStore,
    pub index: ConversationIndex,
    pub registry: Arc<HandlerRegistry>,
    pub streams: Arc<ActiveStreams>,
    pub timeouts: StreamTimeouts,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_timeouts(StreamTimeouts::default())
    }

    /// Runtime with custom stream timers. Mostly useful in tests.
    pub fn with_timeouts(timeouts: StreamTimeouts) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store: SessionStore::new(),
                index: ConversationIndex::new(),
                registry: Arc::new(HandlerRegistry::default()),
                streams: Arc::new(ActiveStreams::default()),
                timeouts,
            }),
        }
    }

    /// Registers the new-chat handler, invoked when the server mints a
    /// conversation id. Last registration wins.
    pub fn on_new_chat<Args>(&self, handler: impl NewChatHandler<Args>) -> &Self {
        self.inner.registry.set_new_chat(handler);
        self
    }

    /// Registers the message handler. Last registration wins.
    pub fn on_message<Args>(&self, handler: impl MessageHandler<Args>) -> &Self {
        self.inner.registry.set_message(handler);
        self
    }

    /// Registers the history handler. Last registration wins.
    pub fn on_history<Args>(&self, handler: impl HistoryHandler<Args>) -> &Self {
        self.inner.registry.set_history(handler);
        self
    }

    /// The axum router serving the four HTTP endpoints, accepting any origin.
    pub fn router(&self) -> Router {
        server::router(self.clone(), None)
    }

    /// Same router with CORS restricted to the given origins.
    pub fn router_with_origins(&self, allow_origins: Vec<String>) -> Router {
        server::router(self.clone(), Some(allow_origins))
    }

    /// Replaces a user's conversation list. Streaming never touches the
    /// list; titling conversations is a handler concern.
    pub fn set_conversation_list(&self, user_id: &str, entries: Vec<ConversationSummary>) {
        self.inner.index.set(user_id, entries);
    }

    pub fn get_conversation_list(&self, user_id: &str) -> Vec<ConversationSummary> {
        self.inner.index.get(user_id)
    }

    /// Drops all bubbles of the named conversation. An attached stream, if
    /// any, stays attached.
    pub fn clear_conversation(&self, conversation_id: &str) {
        if let Some(session) = self.inner.store.get(conversation_id) {
            session.clear();
        }
    }
}
