//! Per-subscription delivery worker.
//!
//! Drains one subscription's queue and invokes its handler, one message at
//! a time. Handler errors and panics are logged and counted; the worker
//! keeps going. It exits when the subscription is cancelled or its queue
//! is closed, then marks the subscription `Closed`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::handler::{Handler, HandlerContext};
use crate::message::Message;
use crate::stats::BusCounters;
use crate::subscription::Subscription;

pub(crate) async fn run(
    subscription: Subscription,
    handler: Arc<dyn Handler>,
    mut queue: mpsc::Receiver<Arc<Message>>,
    counters: Arc<BusCounters>,
) {
    subscription.mark_active();
    let cancel = subscription.token().clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(message) => deliver(&subscription, handler.as_ref(), message, &counters).await,
                None => break,
            },
        }
    }

    // Refuse anything still racing in from the dispatcher.
    queue.close();
    subscription.mark_closed();
    tracing::debug!(
        subscription_id = subscription.id(),
        channel = subscription.channel(),
        "Delivery worker stopped"
    );
}

async fn deliver(
    subscription: &Subscription,
    handler: &dyn Handler,
    message: Arc<Message>,
    counters: &BusCounters,
) {
    let message_id = message.id;
    let ctx = HandlerContext::new(subscription.clone());
    let result = AssertUnwindSafe(handler.handle(ctx, message))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(())) => counters.record_delivered(),
        Ok(Err(e)) => {
            counters.record_handler_failure();
            tracing::warn!(
                subscription_id = subscription.id(),
                message_id,
                error = %e,
                "Handler returned an error"
            );
        }
        Err(payload) => {
            counters.record_handler_failure();
            tracing::error!(
                subscription_id = subscription.id(),
                message_id,
                panic = panic_message(payload.as_ref()),
                "Handler panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
