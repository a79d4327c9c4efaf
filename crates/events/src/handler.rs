//! Subscriber callbacks.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::subscription::Subscription;

/// Per-invocation context handed to a [`Handler`].
///
/// The token fires when the owning subscription is unsubscribed or the bus
/// shuts down; long-running handlers can watch it to bail out early.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    subscription: Subscription,
}

impl HandlerContext {
    pub(crate) fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    pub fn subscription_id(&self) -> &str {
        self.subscription.id()
    }

    /// Channel the subscription listens on (may be `"*"`).
    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.subscription.token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.subscription.token().is_cancelled()
    }
}

/// Receives messages for one subscription.
///
/// Invoked sequentially by the subscription's delivery worker. A returned
/// error is logged and the message is not redelivered; retrying is up to
/// the handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: HandlerContext, message: Arc<Message>) -> anyhow::Result<()>;
}

/// [`Handler`] built from an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`].
///
/// ```rust
/// use pollbus_events::handler_fn;
///
/// let handler = handler_fn(|_ctx, message| async move {
///     println!("got #{}", message.id);
///     anyhow::Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HandlerContext, Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HandlerContext, Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, message: Arc<Message>) -> anyhow::Result<()> {
        (self.f)(ctx, message).await
    }
}
