//! Handler registry: the three user-supplied callbacks.
//!
//! Slots hold erased async functions. Registration is idempotent: the last
//! registration wins. New-chat and history handlers accept either a single
//! context argument or the positional `(conversation_id, user_id)` pair; the
//! `Handler<Args>` marker-trait trick (the same one axum uses for its route
//! handlers) lets both coexist behind one registration method.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bubble::{BubbleDraft, BubbleRecord};

/// Context for `on_message`.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub conversation_id: String,
    pub user_id: String,
    pub message: String,
    /// Cancelled when the client cancels or the stream times out. Handlers
    /// doing long-running work should observe it; those that don't are cut
    /// off at the sink instead.
    pub cancel: CancellationToken,
}

/// Context for `on_new_chat`.
#[derive(Debug, Clone)]
pub struct NewChatContext {
    pub conversation_id: String,
    pub user_id: String,
}

/// Context for `on_history`.
#[derive(Debug, Clone)]
pub struct HistoryContext {
    pub conversation_id: String,
    pub user_id: String,
}

/// What a history handler produced.
#[derive(Debug, Clone)]
pub enum HistoryOutcome {
    /// Handler had nothing to say; export the session's current bubbles.
    Fallback,
    Messages(Vec<BubbleRecord>),
}

pub(crate) type NewChatFn =
    Arc<dyn Fn(NewChatContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub(crate) type MessageFn =
    Arc<dyn Fn(MessageContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub(crate) type HistoryFn =
    Arc<dyn Fn(HistoryContext) -> BoxFuture<'static, anyhow::Result<HistoryOutcome>> + Send + Sync>;

/// Normalizes handler return values: `()` or a `Result<(), E>`.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> anyhow::Result<()>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E: Into<anyhow::Error>> IntoHandlerResult for Result<(), E> {
    fn into_handler_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// Normalizes history handler return values. Returning `()` (or `None`)
/// requests the session-export fallback; records pass through; drafts are
/// normalized to records.
pub trait IntoHistory {
    fn into_history(self) -> anyhow::Result<HistoryOutcome>;
}

impl IntoHistory for () {
    fn into_history(self) -> anyhow::Result<HistoryOutcome> {
        Ok(HistoryOutcome::Fallback)
    }
}

impl IntoHistory for Vec<BubbleRecord> {
    fn into_history(self) -> anyhow::Result<HistoryOutcome> {
        Ok(HistoryOutcome::Messages(self))
    }
}

impl IntoHistory for Option<Vec<BubbleRecord>> {
    fn into_history(self) -> anyhow::Result<HistoryOutcome> {
        Ok(match self {
            Some(messages) => HistoryOutcome::Messages(messages),
            None => HistoryOutcome::Fallback,
        })
    }
}

impl IntoHistory for Vec<BubbleDraft> {
    fn into_history(self) -> anyhow::Result<HistoryOutcome> {
        let records = self
            .iter()
            .map(BubbleDraft::to_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HistoryOutcome::Messages(records))
    }
}

impl<T: IntoHistory, E: Into<anyhow::Error>> IntoHistory for Result<T, E> {
    fn into_history(self) -> anyhow::Result<HistoryOutcome> {
        self.map_err(Into::into)?.into_history()
    }
}

/// An `on_new_chat` callback under either calling convention.
pub trait NewChatHandler<Args>: Send + Sync + 'static {
    fn call(&self, ctx: NewChatContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> NewChatHandler<NewChatContext> for F
where
    F: Fn(NewChatContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, ctx: NewChatContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let fut = self(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

impl<F, Fut> NewChatHandler<(String, String)> for F
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, ctx: NewChatContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let fut = self(ctx.conversation_id, ctx.user_id);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// An `on_message` callback.
pub trait MessageHandler<Args>: Send + Sync + 'static {
    fn call(&self, ctx: MessageContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> MessageHandler<MessageContext> for F
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, ctx: MessageContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let fut = self(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// An `on_history` callback under either calling convention.
pub trait HistoryHandler<Args>: Send + Sync + 'static {
    fn call(&self, ctx: HistoryContext) -> BoxFuture<'static, anyhow::Result<HistoryOutcome>>;
}

impl<F, Fut> HistoryHandler<HistoryContext> for F
where
    F: Fn(HistoryContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHistory,
{
    fn call(&self, ctx: HistoryContext) -> BoxFuture<'static, anyhow::Result<HistoryOutcome>> {
        let fut = self(ctx);
        Box::pin(async move { fut.await.into_history() })
    }
}

impl<F, Fut> HistoryHandler<(String, String)> for F
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHistory,
{
    fn call(&self, ctx: HistoryContext) -> BoxFuture<'static, anyhow::Result<HistoryOutcome>> {
        let fut = self(ctx.conversation_id, ctx.user_id);
        Box::pin(async move { fut.await.into_history() })
    }
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    new_chat: Mutex<Option<NewChatFn>>,
    message: Mutex<Option<MessageFn>>,
    history: Mutex<Option<HistoryFn>>,
}

impl HandlerRegistry {
    pub fn set_new_chat<Args>(&self, handler: impl NewChatHandler<Args>) {
        let handler = Arc::new(handler);
        *self.new_chat.lock() = Some(Arc::new(move |ctx| handler.call(ctx)));
    }

    pub fn set_message<Args>(&self, handler: impl MessageHandler<Args>) {
        let handler = Arc::new(handler);
        *self.message.lock() = Some(Arc::new(move |ctx| handler.call(ctx)));
    }

    pub fn set_history<Args>(&self, handler: impl HistoryHandler<Args>) {
        let handler = Arc::new(handler);
        *self.history.lock() = Some(Arc::new(move |ctx| handler.call(ctx)));
    }

    pub fn new_chat(&self) -> Option<NewChatFn> {
        self.new_chat.lock().clone()
    }

    pub fn message(&self) -> Option<MessageFn> {
        self.message.lock().clone()
    }

    pub fn history(&self) -> Option<HistoryFn> {
        self.history.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> NewChatContext {
        NewChatContext {
            conversation_id: "c1".into(),
            user_id: "alice".into(),
        }
    }

    #[tokio::test]
    async fn new_chat_accepts_both_conventions() {
        let registry = HandlerRegistry::default();

        registry.set_new_chat(|ctx: NewChatContext| async move {
            assert_eq!(ctx.conversation_id, "c1");
            assert_eq!(ctx.user_id, "alice");
        });
        let handler = registry.new_chat().unwrap();
        (*handler)(ctx()).await.unwrap();

        registry.set_new_chat(|conversation_id: String, user_id: String| async move {
            assert_eq!(conversation_id, "c1");
            assert_eq!(user_id, "alice");
        });
        let handler = registry.new_chat().unwrap();
        (*handler)(ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = HandlerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = calls.clone();
        registry.set_new_chat(move |_: NewChatContext| {
            let first = first.clone();
            async move {
                first.fetch_add(1, Ordering::SeqCst);
            }
        });
        let second = calls.clone();
        registry.set_new_chat(move |_: NewChatContext| {
            let second = second.clone();
            async move {
                second.fetch_add(100, Ordering::SeqCst);
            }
        });

        let handler = registry.new_chat().unwrap();
        (*handler)(ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn handler_errors_surface() {
        let registry = HandlerRegistry::default();
        registry.set_message(|_: MessageContext| async move {
            anyhow::bail!("model unavailable")
        });

        let handler = registry.message().unwrap();
        let err = (*handler)(MessageContext {
            conversation_id: "c1".into(),
            user_id: "alice".into(),
            message: "hi".into(),
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
    }

    #[tokio::test]
    async fn history_outcome_normalization() {
        let registry = HandlerRegistry::default();
        let history_ctx = || HistoryContext {
            conversation_id: "c1".into(),
            user_id: "alice".into(),
        };

        registry.set_history(|_: HistoryContext| async move {});
        let handler = registry.history().unwrap();
        assert!(matches!(
            (*handler)(history_ctx()).await.unwrap(),
            HistoryOutcome::Fallback
        ));

        registry.set_history(|_conversation_id: String, _user_id: String| async move {
            vec![crate::bubble::bubble().role("user").set("Saved")]
        });
        let handler = registry.history().unwrap();
        match (*handler)(history_ctx()).await.unwrap() {
            HistoryOutcome::Messages(messages) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].role, "user");
                assert_eq!(messages[0].content, "Saved");
            }
            other => panic!("expected messages, got {other:?}"),
        }

        registry.set_history(|_: HistoryContext| async move {
            Ok::<_, anyhow::Error>(None::<Vec<BubbleRecord>>)
        });
        let handler = registry.history().unwrap();
        assert!(matches!(
            (*handler)(history_ctx()).await.unwrap(),
            HistoryOutcome::Fallback
        ));
    }
}
