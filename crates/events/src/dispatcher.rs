//! Fan-out of polled messages onto subscription queues.
//!
//! Enqueueing never waits. When a subscriber's queue is full the message is
//! dropped for that subscriber only and everyone else still receives it, so
//! a slow consumer costs itself messages rather than stalling the bus.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use crate::message::Message;
use crate::registry::Registry;
use crate::stats::BusCounters;

/// Result of dispatching one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchOutcome {
    pub enqueued: usize,
    pub dropped: usize,
}

pub(crate) struct Dispatcher {
    registry: Arc<Registry>,
    counters: Arc<BusCounters>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, counters: Arc<BusCounters>) -> Self {
        Self { registry, counters }
    }

    /// Enqueue each message, in order, onto every matching subscription.
    pub async fn dispatch(&self, batch: Vec<Message>) -> DispatchOutcome {
        let batch: Vec<Arc<Message>> = batch.into_iter().map(Arc::new).collect();
        let targets = self.registry.resolve(&batch).await;
        let mut outcome = DispatchOutcome::default();

        for (message, entries) in batch.iter().zip(targets) {
            if entries.is_empty() {
                tracing::trace!(
                    message_id = message.id,
                    channel = %message.channel,
                    "No subscribers for message"
                );
                continue;
            }

            for entry in entries {
                match entry.sender.try_send(Arc::clone(message)) {
                    Ok(()) => outcome.enqueued += 1,
                    Err(TrySendError::Full(_)) => {
                        outcome.dropped += 1;
                        self.counters.record_dropped();
                        tracing::warn!(
                            subscription_id = entry.subscription.id(),
                            message_id = message.id,
                            channel = %message.channel,
                            "Subscriber queue full, dropping message"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(
                            subscription_id = entry.subscription.id(),
                            message_id = message.id,
                            "Subscriber worker stopped, skipping message"
                        );
                    }
                }
            }
        }

        outcome
    }
}
