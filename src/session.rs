//! Session: the ordered bubble collection for one conversation.
//!
//! A session owns its bubbles and holds at most one attached stream sink.
//! Bubble insertion order is the user-visible history order. Sessions are
//! shared behind `Arc`; the inner lock is held only for quick state edits,
//! never across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bubble::{BubbleRecord, BubbleState};
use crate::error::RuntimeError;
use crate::events::StreamEvent;
use crate::sink::StreamSink;

#[derive(Debug)]
pub struct Session {
    conversation_id: String,
    inner: Mutex<SessionInner>,
}

#[derive(Default, Debug)]
struct SessionInner {
    order: Vec<String>,
    bubbles: HashMap<String, BubbleState>,
    sink: Option<StreamSink>,
}

impl Session {
    pub(crate) fn new(conversation_id: String) -> Arc<Self> {
        Arc::new(Self {
            conversation_id,
            inner: Mutex::new(SessionInner::default()),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Attaches the stream sink for one request. At most one sink may be
    /// attached; a second concurrent attach fails.
    pub(crate) fn attach_stream(&self, sink: StreamSink) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.sink.is_some() {
            return Err(RuntimeError::StreamAlreadyAttached);
        }
        inner.sink = Some(sink);
        Ok(())
    }

    /// Clears the attached sink. Idempotent.
    pub(crate) fn detach_stream(&self) {
        self.inner.lock().sink = None;
    }

    pub(crate) fn attached_sink(&self) -> Option<StreamSink> {
        self.inner.lock().sink.clone()
    }

    pub(crate) fn insert(&self, state: BubbleState) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.bubbles.contains_key(&state.id) {
            return Err(RuntimeError::InvalidConfig(format!(
                "bubble id already exists: {}",
                state.id
            )));
        }
        inner.order.push(state.id.clone());
        inner.bubbles.insert(state.id.clone(), state);
        Ok(())
    }

    pub(crate) fn contains(&self, bubble_id: &str) -> bool {
        self.inner.lock().bubbles.contains_key(bubble_id)
    }

    /// Runs `f` against the bubble's state. Returns `None` when the bubble
    /// is gone, the stale-handle case after `clear_conversation()`.
    pub(crate) fn with_bubble<R>(
        &self,
        bubble_id: &str,
        f: impl FnOnce(&mut BubbleState) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.bubbles.get_mut(bubble_id).map(f)
    }

    /// Marks every unfinished bubble done and emits its `done` frame on the
    /// attached sink. Returns the finalized ids, oldest first.
    pub(crate) async fn finalize_pending(&self) -> Vec<String> {
        let (pending, sink) = {
            let mut inner = self.inner.lock();
            let SessionInner { order, bubbles, sink } = &mut *inner;
            let mut pending = Vec::new();
            for id in order.iter() {
                if let Some(state) = bubbles.get_mut(id) {
                    if !state.done {
                        state.done = true;
                        pending.push(id.clone());
                    }
                }
            }
            (pending, sink.clone())
        };

        if let Some(sink) = sink {
            for id in &pending {
                sink.emit(StreamEvent::BubbleDone { bubble_id: id.clone() }).await;
            }
        }
        if !pending.is_empty() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                bubbles = ?pending,
                "auto-finalized bubbles left without done()"
            );
        }
        pending
    }

    /// Ordered plain records of every bubble, done or not.
    pub fn export_messages(&self) -> Vec<BubbleRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.bubbles.get(id))
            .map(BubbleState::to_record)
            .collect()
    }

    /// Drops all bubbles. The attached sink, if any, stays attached; an
    /// in-flight stream keeps emitting for bubbles created after the clear.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.bubbles.clear();
    }

    /// Replaces the whole bubble list, for history hydration.
    pub(crate) fn replace_all(&self, states: Vec<BubbleState>) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        let mut order = Vec::with_capacity(states.len());
        let mut bubbles = HashMap::with_capacity(states.len());
        for state in states {
            if bubbles.contains_key(&state.id) {
                return Err(RuntimeError::InvalidConfig(format!(
                    "bubble id already exists: {}",
                    state.id
                )));
            }
            order.push(state.id.clone());
            bubbles.insert(state.id.clone(), state);
        }
        inner.order = order;
        inner.bubbles = bubbles;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StreamSink;
    use serde_json::{Map, Value};

    fn state(id: &str) -> BubbleState {
        BubbleState {
            id: id.to_string(),
            role: "assistant".into(),
            kind: "text".into(),
            content: String::new(),
            config: Map::new(),
            created_at: None,
            done: false,
        }
    }

    #[test]
    fn second_attach_fails() {
        let session = Session::new("c1".into());
        let (first, _rx1) = StreamSink::new("s1".into());
        let (second, _rx2) = StreamSink::new("s2".into());

        session.attach_stream(first).unwrap();
        assert!(matches!(
            session.attach_stream(second),
            Err(RuntimeError::StreamAlreadyAttached)
        ));

        session.detach_stream();
        session.detach_stream();
        assert!(session.attached_sink().is_none());
    }

    #[test]
    fn duplicate_bubble_id_is_rejected() {
        let session = Session::new("c1".into());
        session.insert(state("b1")).unwrap();
        assert!(session.insert(state("b1")).is_err());
    }

    #[test]
    fn export_preserves_insertion_order() {
        let session = Session::new("c1".into());
        session.insert(state("b1")).unwrap();
        session.insert(state("b2")).unwrap();
        session.insert(state("b3")).unwrap();

        let ids: Vec<String> = session.export_messages().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["b1", "b2", "b3"]);
    }

    #[tokio::test]
    async fn finalize_pending_emits_done_per_unfinished_bubble() {
        let session = Session::new("c1".into());
        let (sink, mut rx) = StreamSink::new("s1".into());
        session.attach_stream(sink).unwrap();

        session.insert(state("b1")).unwrap();
        let mut finished = state("b2");
        finished.done = true;
        session.insert(finished).unwrap();
        session.insert(state("b3")).unwrap();

        let pending = session.finalize_pending().await;
        assert_eq!(pending, ["b1", "b3"]);

        for expected in ["b1", "b3"] {
            let frame: Value = serde_json::from_str(rx.recv().await.unwrap().trim()).unwrap();
            assert_eq!(frame["type"], "done");
            assert_eq!(frame["bubbleId"], expected);
        }

        // second pass finds nothing
        assert!(session.finalize_pending().await.is_empty());
    }

    #[test]
    fn clear_keeps_the_sink_attached() {
        let session = Session::new("c1".into());
        let (sink, _rx) = StreamSink::new("s1".into());
        session.attach_stream(sink).unwrap();
        session.insert(state("b1")).unwrap();

        session.clear();

        assert!(session.export_messages().is_empty());
        assert!(!session.contains("b1"));
        assert!(session.attached_sink().is_some());
    }
}
