//! Bubbles: the incrementally-mutable message fragments handlers build.
//!
//! A [`BubbleDraft`] is a free value with no session affiliation; `send()`
//! binds it into the active session and returns a [`Bubble`] handle. Handles
//! address their state by id through the session, so a handle held across
//! `clear_conversation()` simply stops resolving and its mutations become
//! silent no-ops.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{merge_config, ConfigPatch};
use crate::context::ActiveContext;
use crate::error::RuntimeError;
use crate::events::StreamEvent;
use crate::ids::{new_id, now_rfc3339};
use crate::session::Session;
use crate::sink::StreamSink;

const DEFAULT_ROLE: &str = "assistant";
const DEFAULT_KIND: &str = "text";

/// Session-owned state of one bubble.
#[derive(Debug, Clone)]
pub(crate) struct BubbleState {
    pub id: String,
    pub role: String,
    pub kind: String,
    pub content: String,
    pub config: Map<String, Value>,
    pub created_at: Option<String>,
    pub done: bool,
}

impl BubbleState {
    pub(crate) fn to_record(&self) -> BubbleRecord {
        BubbleRecord {
            id: self.id.clone(),
            role: self.role.clone(),
            content: self.content.clone(),
            kind: self.kind.clone(),
            config: self.config.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Plain wire form of a bubble, as served by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

impl BubbleRecord {
    /// Collapses the record to the `{role, content}` pair chat-completion
    /// APIs expect.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.clone(),
            content: self.content.clone(),
        }
    }
}

/// `{role, content}` pair for forwarding history to an LLM API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Builds a detached bubble template. Pure; callable anywhere.
pub fn bubble() -> BubbleDraft {
    BubbleDraft::default()
}

/// An unbound bubble template: desired role/type, pending content, pending
/// config. Reusable: `send()` takes `&self` and every call binds a fresh
/// bubble.
#[derive(Debug, Clone, Default)]
pub struct BubbleDraft {
    id: Option<String>,
    content: String,
    patch: ConfigPatch,
}

impl BubbleDraft {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.patch = self.patch.role(role);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.patch = self.patch.kind(kind);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.patch = self.patch.name(name);
        self
    }

    pub fn clear_name(mut self) -> Self {
        self.patch = self.patch.clear_name();
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.patch = self.patch.icon(icon);
        self
    }

    pub fn clear_icon(mut self) -> Self {
        self.patch = self.patch.clear_icon();
        self
    }

    pub fn collapsible(mut self, collapsible: bool) -> Self {
        self.patch = self.patch.collapsible(collapsible);
        self
    }

    pub fn collapsible_by_default(mut self, by_default: bool) -> Self {
        self.patch = self.patch.collapsible_by_default(by_default);
        self
    }

    pub fn collapsible_title(mut self, title: impl Into<String>) -> Self {
        self.patch = self.patch.collapsible_title(title);
        self
    }

    pub fn collapsible_max_height(mut self, max_height: impl Into<Value>) -> Self {
        self.patch = self.patch.collapsible_max_height(max_height);
        self
    }

    pub fn bubble_bg_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.bubble_bg_color(color);
        self
    }

    pub fn bubble_text_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.bubble_text_color(color);
        self
    }

    pub fn bubble_border_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.bubble_border_color(color);
        self
    }

    pub fn header_bg_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_bg_color(color);
        self
    }

    pub fn header_text_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_text_color(color);
        self
    }

    pub fn header_border_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_border_color(color);
        self
    }

    pub fn header_icon_bg_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_icon_bg_color(color);
        self
    }

    pub fn header_icon_text_color(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_icon_text_color(color);
        self
    }

    pub fn extra(mut self, extra: Map<String, Value>) -> Self {
        self.patch = self.patch.extra(extra);
        self
    }

    /// Replaces the pending content.
    pub fn set(mut self, text: impl Into<String>) -> Self {
        self.content = text.into();
        self
    }

    /// Appends to the pending content.
    pub fn stream(mut self, text: impl AsRef<str>) -> Self {
        self.content.push_str(text.as_ref());
        self
    }

    /// Normalizes the draft into a plain record without binding it. Used by
    /// history handlers that return templates instead of records.
    pub fn to_record(&self) -> Result<BubbleRecord, RuntimeError> {
        let patch = self.patch.clone().normalize("bubble()")?;
        Ok(BubbleRecord {
            id: self.id.clone().unwrap_or_else(new_id),
            role: patch.role.unwrap_or_else(default_role),
            content: self.content.clone(),
            kind: patch.kind.unwrap_or_else(default_kind),
            config: patch.entries,
            created_at: None,
        })
    }

    /// `{role, content}` view of the pending draft.
    pub fn to_chat_message(&self) -> ChatMessage {
        let role = self
            .patch
            .clone()
            .normalize("bubble()")
            .ok()
            .and_then(|p| p.role)
            .unwrap_or_else(default_role);
        ChatMessage {
            role,
            content: self.content.clone(),
        }
    }

    /// Binds the template into the active session and returns the bound
    /// bubble.
    ///
    /// Emits the initial `config` frame (and a `set` frame when the draft
    /// carries content) on the context's sink. Without a sink the bubble is
    /// still recorded but marked done immediately; that is the history path.
    pub async fn send(&self) -> Result<Bubble, RuntimeError> {
        let ctx = ActiveContext::current()?;
        let patch = self.patch.clone().normalize("bubble()")?;

        let id = self.id.clone().unwrap_or_else(new_id);
        let role = patch.role.unwrap_or_else(default_role);
        let kind = patch.kind.unwrap_or_else(default_kind);

        let mut config = Map::new();
        merge_config(&mut config, &patch.entries);

        ctx.session.insert(BubbleState {
            id: id.clone(),
            role: role.clone(),
            kind: kind.clone(),
            content: self.content.clone(),
            config,
            created_at: Some(now_rfc3339()),
            done: ctx.sink.is_none(),
        })?;

        if let Some(sink) = &ctx.sink {
            let mut init_patch = Map::new();
            init_patch.insert("role".to_string(), Value::String(role));
            init_patch.insert("type".to_string(), Value::String(kind));
            init_patch.extend(patch.entries);
            sink.emit(StreamEvent::Config {
                bubble_id: id.clone(),
                patch: init_patch,
            })
            .await;

            if !self.content.is_empty() {
                sink.emit(StreamEvent::Set {
                    bubble_id: id.clone(),
                    content: self.content.clone(),
                })
                .await;
            }
        }

        Ok(Bubble {
            id,
            session: ctx.session,
            sink: ctx.sink,
        })
    }
}

/// Handle to a bubble bound into a session.
#[derive(Clone, Debug)]
pub struct Bubble {
    id: String,
    session: Arc<Session>,
    sink: Option<StreamSink>,
}

impl Bubble {
    pub(crate) fn attached(id: String, session: Arc<Session>, sink: Option<StreamSink>) -> Self {
        Self { id, session, sink }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> String {
        self.session
            .with_bubble(&self.id, |state| state.content.clone())
            .unwrap_or_default()
    }

    pub fn role(&self) -> String {
        self.session
            .with_bubble(&self.id, |state| state.role.clone())
            .unwrap_or_else(default_role)
    }

    pub fn kind(&self) -> String {
        self.session
            .with_bubble(&self.id, |state| state.kind.clone())
            .unwrap_or_else(default_kind)
    }

    pub fn is_done(&self) -> bool {
        self.session
            .with_bubble(&self.id, |state| state.done)
            .unwrap_or(true)
    }

    /// Snapshot of the stored (merged) config.
    pub fn config_data(&self) -> Map<String, Value> {
        self.session
            .with_bubble(&self.id, |state| state.config.clone())
            .unwrap_or_default()
    }

    pub fn record(&self) -> Option<BubbleRecord> {
        self.session.with_bubble(&self.id, |state| state.to_record())
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role(),
            content: self.content(),
        }
    }

    /// Replaces the content. Emits a `set` frame unless the bubble is done
    /// or the handle is stale.
    pub async fn set(&self, text: impl Into<String>) {
        let content = text.into();
        let event = self.session.with_bubble(&self.id, |state| {
            state.content = content.clone();
            (!state.done).then(|| StreamEvent::Set {
                bubble_id: state.id.clone(),
                content: content.clone(),
            })
        });
        self.emit(event.flatten()).await;
    }

    /// Appends a chunk. Emits a `delta` frame unless the bubble is done or
    /// the handle is stale.
    pub async fn stream(&self, text: impl AsRef<str>) {
        let chunk = text.as_ref().to_string();
        let event = self.session.with_bubble(&self.id, |state| {
            state.content.push_str(&chunk);
            (!state.done).then(|| StreamEvent::Delta {
                bubble_id: state.id.clone(),
                content: chunk.clone(),
            })
        });
        self.emit(event.flatten()).await;
    }

    /// Validates and merges a config patch, emitting a `config` frame with
    /// the incoming patch. `role`/`type` updates travel in the patch.
    pub async fn config(&self, patch: ConfigPatch) -> Result<(), RuntimeError> {
        let patch = patch.normalize("bubble.config()")?;
        let event = self.session.with_bubble(&self.id, |state| {
            let mut event_patch = Map::new();
            if let Some(role) = &patch.role {
                state.role = role.clone();
                event_patch.insert("role".to_string(), Value::String(role.clone()));
            }
            if let Some(kind) = &patch.kind {
                state.kind = kind.clone();
                event_patch.insert("type".to_string(), Value::String(kind.clone()));
            }
            if !patch.entries.is_empty() {
                merge_config(&mut state.config, &patch.entries);
                event_patch.extend(patch.entries.clone());
            }
            (!state.done && !event_patch.is_empty()).then(|| StreamEvent::Config {
                bubble_id: state.id.clone(),
                patch: event_patch,
            })
        });
        self.emit(event.flatten()).await;
        Ok(())
    }

    /// Finalizes the bubble. The `done` frame is emitted exactly once; later
    /// calls are no-ops.
    pub async fn done(&self) {
        let event = self.session.with_bubble(&self.id, |state| {
            (!state.done).then(|| {
                state.done = true;
                StreamEvent::BubbleDone {
                    bubble_id: state.id.clone(),
                }
            })
        });
        self.emit(event.flatten()).await;
    }

    async fn emit(&self, event: Option<StreamEvent>) {
        if let (Some(event), Some(sink)) = (event, &self.sink) {
            sink.emit(event).await;
        }
    }
}
