//! bubbleflow: server-side streaming runtime for chat bubbles.
//!
//! User handlers incrementally build and mutate "bubbles" (structured
//! message fragments) while the runtime streams every mutation to the
//! connected client as newline-delimited JSON. The hard parts live here:
//! the ordered stream sink, the bubble lifecycle state machine, the
//! per-request ambient context, and the stream controller with its
//! heartbeat, timeout, and cancellation plumbing.
//!
//! ```no_run
//! use bubbleflow::{bubble, MessageContext, Runtime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Runtime::new();
//!     runtime.on_message(|ctx: MessageContext| async move {
//!         let reply = bubble().role("assistant").send().await?;
//!         reply.stream("Echo: ").await;
//!         reply.stream(&ctx.message).await;
//!         reply.done().await;
//!         anyhow::Ok(())
//!     });
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8787").await?;
//!     axum::serve(listener, runtime.router()).await?;
//!     Ok(())
//! }
//! ```

pub mod bubble;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod ids;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod session;
pub mod sink;
pub mod store;

pub use bubble::{bubble, Bubble, BubbleDraft, BubbleRecord, ChatMessage};
pub use config::{ConfigPatch, COLOR_AUTO};
pub use context::{access_bubble, clear_conversation, load};
pub use controller::StreamTimeouts;
pub use error::RuntimeError;
pub use events::StreamEvent;
pub use registry::{
    HistoryContext, HistoryOutcome, IntoHandlerResult, IntoHistory, MessageContext, NewChatContext,
};
pub use runtime::Runtime;
pub use server::StreamChatRequest;
pub use sink::StreamSink;
pub use store::{ConversationSummary, ANONYMOUS_USER};
