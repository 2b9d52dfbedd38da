//! Demo bubble server.
//!
//! Registers a greeting handler for new conversations and an echo handler
//! that streams its reply character by character. Run it, then:
//!
//! ```sh
//! curl -N -X POST localhost:8787/api/conversations/stream \
//!   -H 'content-type: application/json' -H 'user-id: demo' \
//!   -d '{"message":"hi"}'
//! ```

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use bubbleflow::{
    bubble, BubbleRecord, ConversationSummary, HistoryContext, MessageContext, NewChatContext,
    Runtime,
};

#[derive(Parser)]
#[command(name = "bubbleflow")]
#[command(about = "Streaming chat-bubble demo server")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8787)]
    port: u16,

    /// Allowed CORS origins (repeatable); every origin is allowed when unset
    #[arg(long = "allow-origin", env = "CORS_ORIGINS", value_delimiter = ',')]
    allow_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = Runtime::new();

    runtime.on_new_chat({
        let runtime = runtime.clone();
        move |ctx: NewChatContext| {
            let runtime = runtime.clone();
            async move {
                let greeting = bubble().role("assistant").name("Demo").send().await?;
                greeting.set("Hi! Send me anything and I will echo it back.").await;
                greeting.done().await;

                let mut list = runtime.get_conversation_list(&ctx.user_id);
                list.insert(
                    0,
                    ConversationSummary::new(
                        ctx.conversation_id.clone(),
                        "New conversation",
                        chrono::Utc::now().timestamp_millis(),
                    )?,
                );
                runtime.set_conversation_list(&ctx.user_id, list);
                anyhow::Ok(())
            }
        }
    });

    runtime.on_message(|ctx: MessageContext| async move {
        let reply = bubble().role("assistant").send().await?;
        for ch in format!("Echo: {}", ctx.message).chars() {
            if ctx.cancel.is_cancelled() {
                break;
            }
            reply.stream(ch.to_string()).await;
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        reply.done().await;
        anyhow::Ok(())
    });

    // nothing persisted elsewhere, so hand history back to the session export
    runtime.on_history(|ctx: HistoryContext| async move {
        tracing::debug!(conversation_id = %ctx.conversation_id, "history requested");
        Ok::<_, anyhow::Error>(None::<Vec<BubbleRecord>>)
    });

    let router = if args.allow_origins.is_empty() {
        runtime.router()
    } else {
        runtime.router_with_origins(args.allow_origins.clone())
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "bubbleflow demo listening");
    axum::serve(listener, router).await?;

    Ok(())
}
