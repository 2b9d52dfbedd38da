//! Active context: the per-request ambient binding.
//!
//! Handler code creates and mutates bubbles without threading a session
//! through every call. The binding is a tokio task-local, so concurrent
//! requests are isolated and the binding disappears on every exit path of
//! the handler future. It does not cross `tokio::spawn` boundaries unless
//! explicitly re-scoped.

use std::future::Future;
use std::sync::Arc;

use crate::bubble::{Bubble, BubbleRecord, BubbleState};
use crate::error::RuntimeError;
use crate::ids::new_id;
use crate::session::Session;
use crate::sink::StreamSink;

tokio::task_local! {
    static ACTIVE_CONTEXT: ActiveContext;
}

/// Binding of (session, sink?) for the dynamic extent of one handler
/// invocation. The history endpoint binds a session with no sink.
#[derive(Clone)]
pub(crate) struct ActiveContext {
    pub(crate) session: Arc<Session>,
    pub(crate) sink: Option<StreamSink>,
}

impl ActiveContext {
    pub(crate) fn new(session: Arc<Session>, sink: Option<StreamSink>) -> Self {
        Self { session, sink }
    }

    /// Runs `fut` with this context bound for its whole dynamic extent.
    pub(crate) async fn scope<F: Future>(self, fut: F) -> F::Output {
        ACTIVE_CONTEXT.scope(self, fut).await
    }

    pub(crate) fn current() -> Result<Self, RuntimeError> {
        ACTIVE_CONTEXT
            .try_with(Self::clone)
            .map_err(|_| RuntimeError::NoActiveContext)
    }
}

/// Looks up an existing bubble of the active session by id. Requires an
/// active context with an attached stream.
pub fn access_bubble(bubble_id: &str) -> Result<Bubble, RuntimeError> {
    let ctx = ActiveContext::current()?;
    let sink = ctx.sink.ok_or(RuntimeError::NoActiveStream)?;
    if !ctx.session.contains(bubble_id) {
        return Err(RuntimeError::BubbleNotFound(bubble_id.to_string()));
    }
    Ok(Bubble::attached(
        bubble_id.to_string(),
        ctx.session,
        Some(sink),
    ))
}

/// Drops every bubble of the active session. The stream, if one is running,
/// stays attached and keeps emitting for bubbles created afterwards.
pub fn clear_conversation() -> Result<(), RuntimeError> {
    let ctx = ActiveContext::current()?;
    ctx.session.clear();
    Ok(())
}

/// Replaces the active session's bubbles with the given records, minting ids
/// where absent and marking everything done. Returns the normalized records
/// in order, the shape a history handler can hand straight back.
pub fn load(
    records: impl IntoIterator<Item = BubbleRecord>,
) -> Result<Vec<BubbleRecord>, RuntimeError> {
    let ctx = ActiveContext::current()?;

    let mut states = Vec::new();
    for mut record in records {
        if record.id.is_empty() {
            record.id = new_id();
        }
        states.push(BubbleState {
            id: record.id,
            role: record.role,
            kind: record.kind,
            content: record.content,
            config: record.config,
            created_at: record.created_at,
            done: true,
        });
    }
    ctx.session.replace_all(states)?;
    Ok(ctx.session.export_messages())
}
