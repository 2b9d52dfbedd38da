//! Stream controller: drives one streaming request end-to-end.
//!
//! The controller emits the lifecycle frames, runs the user handlers under
//! an active context on their own task, keeps a heartbeat going, enforces
//! the first-event and idle timeouts, and honors out-of-band cancellation.
//! Whatever happens, every stream ends with pending bubbles finalized and
//! exactly one terminal frame, then the sink closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::ActiveContext;
use crate::events::StreamEvent;
use crate::registry::{HandlerRegistry, MessageContext, NewChatContext};
use crate::session::Session;
use crate::sink::StreamSink;

/// Timer configuration for streaming requests. The defaults match the wire
/// contract; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    /// Heartbeat cadence while the stream is running.
    pub heartbeat: Duration,
    /// Max wait for the first handler-produced frame.
    pub first_event: Duration,
    /// Max gap between handler-produced frames after the first.
    pub idle: Duration,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            first_event: Duration::from_secs(30),
            idle: Duration::from_secs(60),
        }
    }
}

/// Live streams by stream id, for the out-of-band cancel endpoint.
#[derive(Default)]
pub(crate) struct ActiveStreams {
    streams: RwLock<HashMap<String, CancellationToken>>,
}

impl ActiveStreams {
    /// Allocates the cancel handle for a new stream.
    pub fn register(&self, stream_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.streams
            .write()
            .insert(stream_id.to_string(), token.clone());
        token
    }

    /// Requests cancellation. Returns false for unknown (or already closed)
    /// streams; repeat calls on a live stream are harmless.
    pub fn cancel(&self, stream_id: &str) -> bool {
        match self.streams.read().get(stream_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, stream_id: &str) {
        self.streams.write().remove(stream_id);
    }
}

/// Everything one streaming request needs.
pub(crate) struct StreamJob {
    pub session: Arc<Session>,
    pub sink: StreamSink,
    pub cancel: CancellationToken,
    pub registry: Arc<HandlerRegistry>,
    pub streams: Arc<ActiveStreams>,
    pub timeouts: StreamTimeouts,
    pub conversation_id: String,
    /// True when the server minted the conversation id for this request.
    pub minted: bool,
    pub user_id: String,
    pub message: Option<String>,
}

enum Outcome {
    Done,
    Interrupted(&'static str),
    Failed(String),
}

pub(crate) async fn drive(job: StreamJob) {
    let StreamJob {
        session,
        sink,
        cancel,
        registry,
        streams,
        timeouts,
        conversation_id,
        minted,
        user_id,
        message,
    } = job;
    let stream_id = sink.stream_id().to_string();
    tracing::info!(
        stream_id = %stream_id,
        conversation_id = %conversation_id,
        user_id = %user_id,
        minted,
        "stream opened"
    );

    sink.emit(StreamEvent::Started {
        conversation_id: conversation_id.clone(),
    })
    .await;
    if minted {
        sink.emit(StreamEvent::Meta {
            conversation_id: conversation_id.clone(),
        })
        .await;
    }

    let heartbeat = tokio::spawn({
        let sink = sink.clone();
        let period = timeouts.heartbeat;
        async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate tick
            loop {
                ticker.tick().await;
                sink.emit(StreamEvent::Heartbeat).await;
            }
        }
    });

    let mut handler_task = tokio::spawn(
        ActiveContext::new(session.clone(), Some(sink.clone())).scope(run_handlers(
            registry,
            sink.clone(),
            conversation_id.clone(),
            minted,
            user_id,
            message,
            cancel.clone(),
        )),
    );

    let started_at = Instant::now();
    let closed = sink.closed_token();

    let outcome = loop {
        let (frames, last_activity) = sink.activity();
        let deadline = if frames == 0 {
            started_at + timeouts.first_event
        } else {
            last_activity + timeouts.idle
        };
        if Instant::now() >= deadline {
            break Outcome::Interrupted(if frames == 0 {
                "first_event_timeout"
            } else {
                "idle_timeout"
            });
        }

        tokio::select! {
            result = &mut handler_task => {
                break match result {
                    Ok(Ok(())) => Outcome::Done,
                    Ok(Err(err)) => Outcome::Failed(err.to_string()),
                    Err(err) => Outcome::Failed(format!("handler panicked: {err}")),
                };
            }
            _ = cancel.cancelled() => break Outcome::Interrupted("client_cancel"),
            _ = closed.cancelled() => break Outcome::Interrupted("disconnect"),
            _ = sleep_until(deadline) => {} // re-arm against the latest activity
        }
    };

    heartbeat.abort();
    if !handler_task.is_finished() {
        // cooperative stop; an ignoring handler keeps computing but its
        // emits are dropped once the sink closes
        cancel.cancel();
    }

    session.finalize_pending().await;

    let reason = match &outcome {
        Outcome::Done => "normal",
        Outcome::Interrupted(reason) => *reason,
        Outcome::Failed(_) => "handler_error",
    };
    let terminal = match outcome {
        Outcome::Done => StreamEvent::StreamDone {
            reason: "normal".to_string(),
        },
        Outcome::Interrupted(reason) => StreamEvent::Interrupted {
            reason: reason.to_string(),
        },
        Outcome::Failed(message) => {
            tracing::error!(stream_id = %stream_id, error = %message, "handler failed");
            StreamEvent::Error {
                reason: "handler_error".to_string(),
                message,
            }
        }
    };
    sink.emit(terminal).await;

    sink.close().await;
    session.detach_stream();
    streams.remove(&stream_id);
    tracing::info!(stream_id = %stream_id, reason, "stream closed");
}

/// The handler side of one request: new-chat for minted conversations, then
/// the message handler when there is a non-blank message.
async fn run_handlers(
    registry: Arc<HandlerRegistry>,
    sink: StreamSink,
    conversation_id: String,
    minted: bool,
    user_id: String,
    message: Option<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let message = message.filter(|m| !m.trim().is_empty());
    let message_handler = message.as_ref().and_then(|_| registry.message());

    if message_handler.is_some() {
        sink.emit(StreamEvent::Progress {
            stage: "processing".to_string(),
        })
        .await;
    }

    if minted {
        if let Some(handler) = registry.new_chat() {
            (*handler)(NewChatContext {
                conversation_id: conversation_id.clone(),
                user_id: user_id.clone(),
            })
            .await?;
        }
    }

    if let (Some(handler), Some(message)) = (message_handler, message) {
        (*handler)(MessageContext {
            conversation_id,
            user_id,
            message,
            cancel,
        })
        .await?;
    }
    Ok(())
}
