//! HTTP adapter: maps the four endpoints onto the runtime.
//!
//! - `GET  /api/conversations` - the caller's conversation list
//! - `GET  /api/conversations/{id}/messages` - history (handler or export)
//! - `POST /api/conversations/stream` - the NDJSON streaming endpoint
//! - `POST /api/streams/{id}/cancel` - out-of-band cancellation
//!
//! All endpoints read the optional `User-Id` header; blank or missing means
//! `"anonymous"`. The adapter stays thin: parse, normalize, hand off to the
//! controller, stream bytes out.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::bubble::BubbleRecord;
use crate::context::ActiveContext;
use crate::controller::{self, StreamJob};
use crate::error::{ApiError, RuntimeError};
use crate::ids::new_id;
use crate::registry::{HistoryContext, HistoryOutcome};
use crate::runtime::Runtime;
use crate::sink::StreamSink;
use crate::store::normalize_user_id;

pub(crate) fn router(runtime: Runtime, allow_origins: Option<Vec<String>>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    // no origin list means a wide-open dev server
    let cors = match allow_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            cors.allow_origin(AllowOrigin::list(origins))
        }
        None => cors.allow_origin(Any),
    };

    Router::new()
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(conversation_messages),
        )
        .route("/api/conversations/stream", post(stream_conversation))
        .route("/api/streams/{stream_id}/cancel", post(cancel_stream))
        .layer(cors)
        .with_state(runtime)
}

fn user_id_from(headers: &HeaderMap) -> String {
    normalize_user_id(headers.get("user-id").and_then(|v| v.to_str().ok()))
}

// ============================================================================
// Request/response types
// ============================================================================

/// Body of `POST /api/conversations/stream`.
#[derive(Debug, Deserialize)]
pub struct StreamChatRequest {
    #[serde(rename = "conversationId", default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConversationsResponse {
    conversations: Vec<crate::store::ConversationSummary>,
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    #[serde(rename = "conversationId")]
    conversation_id: String,
    messages: Vec<BubbleRecord>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    status: &'static str,
}

// ============================================================================
// Endpoints
// ============================================================================

async fn list_conversations(
    State(runtime): State<Runtime>,
    headers: HeaderMap,
) -> Json<ConversationsResponse> {
    let user_id = user_id_from(&headers);
    Json(ConversationsResponse {
        conversations: runtime.get_conversation_list(&user_id),
    })
}

/// Runs the history handler inside an active context with no sink attached;
/// bubbles it sends land in the session and export as plain records.
async fn conversation_messages(
    State(runtime): State<Runtime>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MessagesResponse>, ApiError> {
    let user_id = user_id_from(&headers);
    let session = runtime.inner.store.get_or_create(&conversation_id);

    let outcome = match runtime.inner.registry.history() {
        Some(handler) => ActiveContext::new(session.clone(), None)
            .scope((*handler)(HistoryContext {
                conversation_id: conversation_id.clone(),
                user_id,
            }))
            .await
            .map_err(|err| {
                tracing::error!(conversation_id = %conversation_id, error = %err, "history handler failed");
                match err.downcast::<RuntimeError>() {
                    Ok(runtime_err) => ApiError::from(runtime_err),
                    Err(other) => ApiError::internal(other.to_string()),
                }
            })?,
        None => HistoryOutcome::Fallback,
    };

    let messages = match outcome {
        HistoryOutcome::Messages(messages) => messages,
        HistoryOutcome::Fallback => session.export_messages(),
    };
    Ok(Json(MessagesResponse {
        conversation_id,
        messages,
    }))
}

async fn stream_conversation(
    State(runtime): State<Runtime>,
    headers: HeaderMap,
    Json(payload): Json<StreamChatRequest>,
) -> Result<Response, ApiError> {
    let user_id = user_id_from(&headers);
    let minted = payload.conversation_id.is_none();
    let conversation_id = payload.conversation_id.unwrap_or_else(new_id);
    let session = runtime.inner.store.get_or_create(&conversation_id);

    let stream_id = new_id();
    let (sink, frames) = StreamSink::new(stream_id.clone());
    // one stream per conversation; losers get a 409 before any frame
    session.attach_stream(sink.clone())?;
    let cancel = runtime.inner.streams.register(&stream_id);

    tokio::spawn(controller::drive(StreamJob {
        session,
        sink,
        cancel,
        registry: runtime.inner.registry.clone(),
        streams: runtime.inner.streams.clone(),
        timeouts: runtime.inner.timeouts,
        conversation_id,
        minted,
        user_id,
        message: payload.message,
    }));

    let body = Body::from_stream(ReceiverStream::new(frames).map(Ok::<String, Infallible>));
    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap();
    Ok(response)
}

async fn cancel_stream(
    State(runtime): State<Runtime>,
    Path(stream_id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = runtime.inner.streams.cancel(&stream_id);
    if cancelled {
        tracing::info!(stream_id = %stream_id, "stream cancellation requested");
    }
    Json(CancelResponse {
        status: if cancelled { "cancelled" } else { "unknown" },
    })
}
