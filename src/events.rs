//! NDJSON frame types for the streaming endpoint.
//!
//! Every frame on the wire is a single JSON object carrying at least `type`,
//! `streamId`, and `seq`. The enum below covers the typed payloads; the sink
//! stamps the envelope fields when it writes the frame.

use serde::Serialize;
use serde_json::{Map, Value};

/// Events sent to the client on the NDJSON stream.
///
/// `BubbleDone` and `StreamDone` share the `done` wire tag: one carries a
/// `bubbleId`, the other the stream-terminal `reason`. Frames are
/// serialize-only; clients (and tests) read them as plain JSON objects.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// First frame of every stream.
    #[serde(rename = "started")]
    Started {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Emitted right after `started` when the server minted the conversation id.
    #[serde(rename = "meta")]
    Meta {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Coarse progress marker, emitted before the message handler runs.
    #[serde(rename = "progress")]
    Progress { stage: String },

    /// Keep-alive while the stream is running. Never treated as handler activity.
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Bubble config update; `patch` carries `role`/`type` when they change.
    #[serde(rename = "config")]
    Config {
        #[serde(rename = "bubbleId")]
        bubble_id: String,
        patch: Map<String, Value>,
    },

    /// Replaces bubble content.
    #[serde(rename = "set")]
    Set {
        #[serde(rename = "bubbleId")]
        bubble_id: String,
        content: String,
    },

    /// Appends to bubble content.
    #[serde(rename = "delta")]
    Delta {
        #[serde(rename = "bubbleId")]
        bubble_id: String,
        content: String,
    },

    /// Bubble finalized.
    #[serde(rename = "done")]
    BubbleDone {
        #[serde(rename = "bubbleId")]
        bubble_id: String,
    },

    /// Stream terminal: the handler returned successfully.
    #[serde(rename = "done")]
    StreamDone { reason: String },

    /// Stream terminal: cancelled, disconnected, or timed out.
    #[serde(rename = "interrupted")]
    Interrupted { reason: String },

    /// Stream terminal: the handler failed.
    #[serde(rename = "error")]
    Error { reason: String, message: String },
}

impl StreamEvent {
    /// Whether this frame counts as handler activity for the first-event and
    /// idle timers. `started`, `heartbeat`, and the controller's own
    /// `progress` marker do not; clients must observe real handler output.
    pub(crate) fn counts_as_activity(&self) -> bool {
        matches!(
            self,
            StreamEvent::Meta { .. }
                | StreamEvent::Config { .. }
                | StreamEvent::Set { .. }
                | StreamEvent::Delta { .. }
                | StreamEvent::BubbleDone { .. }
        )
    }
}

/// Serializes one frame with the `streamId` + `seq` envelope, newline-terminated.
pub(crate) fn frame_line(stream_id: &str, seq: u64, event: &StreamEvent) -> String {
    let mut frame = match serde_json::to_value(event) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    frame.insert("streamId".to_string(), Value::String(stream_id.to_string()));
    frame.insert("seq".to_string(), Value::Number(seq.into()));
    let mut line = Value::Object(frame).to_string();
    line.push('\n');
    line
}
