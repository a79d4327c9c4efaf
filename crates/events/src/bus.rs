//! The [`MessageBus`] facade.
//!
//! Wires the publisher, registry, poller, dispatcher, delivery workers and
//! retention sweeper together:
//!
//! ```text
//! publish ──► store ──► poller ──► dispatcher ──► [queue S1] ──► worker S1 ──► handler
//!                ▲                     │
//!                │                     └────────► [queue SN] ──► worker SN ──► handler
//!             sweeper
//! ```
//!
//! Publishing returns once the store has acknowledged the write; delivery
//! follows within roughly one poll interval.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pollbus_core::channels::{self, WILDCARD_CHANNEL};
use pollbus_core::types::DbId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::BusConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BusError;
use crate::handler::Handler;
use crate::message::Metadata;
use crate::poller::{Cursor, Poller};
use crate::registry::{Entry, Registry};
use crate::stats::{BusCounters, BusStats};
use crate::store::MessageStore;
use crate::subscription::Subscription;
use crate::sweeper::RetentionSweeper;
use crate::worker;

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// Durable publish/subscribe bus.
///
/// Cheap to clone; all clones drive the same background tasks. Call
/// [`MessageBus::close`] to shut down.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    registry: Arc<Registry>,
    counters: Arc<BusCounters>,
    cursor: Cursor,
    config: BusConfig,
    /// Root of every subscription token and of the background loops.
    shutdown: CancellationToken,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.inner.config)
            .field("cursor", &self.inner.cursor.position())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    // -- Lifecycle ----------------------------------------------------------

    /// Validate `config`, seed the cursor from the store and start the
    /// poller and sweeper.
    ///
    /// Fails if the configuration is invalid or the store cannot report its
    /// latest id; both are start-up errors the caller should treat as fatal.
    pub async fn start(
        store: Arc<dyn MessageStore>,
        config: BusConfig,
    ) -> Result<Self, BusError> {
        config.validate()?;

        let cursor = Cursor::starting_at(store.latest_id().await?);
        let registry = Arc::new(Registry::new());
        let counters = Arc::new(BusCounters::default());
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();

        let poller = Poller::new(
            Arc::clone(&store),
            Dispatcher::new(Arc::clone(&registry), Arc::clone(&counters)),
            cursor.clone(),
            config.batch_size,
            config.poll_interval,
        );
        tasks.spawn(poller.run(shutdown.clone()));

        let sweeper = RetentionSweeper::new(
            Arc::clone(&store),
            config.retention,
            config.sweep_interval,
        );
        tasks.spawn(sweeper.run(shutdown.clone()));

        tracing::info!(cursor = cursor.position(), "Message bus started");

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                registry,
                counters,
                cursor,
                config,
                shutdown,
                tasks,
                closed: AtomicBool::new(false),
            }),
        })
    }

    // -- Publishing ---------------------------------------------------------

    /// Append `payload` to `channel`. Returns the stored message id.
    pub async fn publish<T>(&self, channel: &str, payload: &T) -> Result<DbId, BusError>
    where
        T: Serialize + ?Sized,
    {
        self.publish_with_metadata(channel, payload, Metadata::new())
            .await
    }

    /// Like [`publish`](Self::publish), carrying `metadata` alongside the
    /// payload.
    pub async fn publish_with_metadata<T>(
        &self,
        channel: &str,
        payload: &T,
        metadata: Metadata,
    ) -> Result<DbId, BusError>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_open()?;
        channels::validate_channel(channel).map_err(|_| BusError::EmptyChannel)?;
        let payload = serde_json::to_value(payload).map_err(BusError::Codec)?;

        let id = self.inner.store.insert(channel, &payload, &metadata).await?;
        self.inner.counters.record_published();
        tracing::debug!(message_id = id, channel, "Message published");
        Ok(id)
    }

    /// Publish to every subscriber regardless of channel.
    pub async fn broadcast<T>(&self, payload: &T) -> Result<DbId, BusError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(WILDCARD_CHANNEL, payload).await
    }

    // -- Subscriptions ------------------------------------------------------

    /// Register `handler` on `channel` (`"*"` receives everything) and start
    /// its delivery worker. Returns without waiting for the worker.
    pub async fn subscribe<H: Handler>(
        &self,
        channel: &str,
        handler: H,
    ) -> Result<Subscription, BusError> {
        self.ensure_open()?;
        channels::validate_channel(channel).map_err(|_| BusError::EmptyChannel)?;

        let subscription = Subscription::new(channel, &self.inner.shutdown);
        let (sender, queue) = mpsc::channel(self.inner.config.queue_capacity);
        self.inner
            .registry
            .insert(Entry {
                subscription: subscription.clone(),
                sender,
            })
            .await?;

        self.inner.tasks.spawn(worker::run(
            subscription.clone(),
            Arc::new(handler),
            queue,
            Arc::clone(&self.inner.counters),
        ));

        tracing::info!(
            subscription_id = subscription.id(),
            channel,
            "Subscribed"
        );
        Ok(subscription)
    }

    /// Pattern subscription. Only the wildcard `"*"` is treated as a
    /// pattern; anything else subscribes to that exact channel name.
    pub async fn subscribe_pattern<H: Handler>(
        &self,
        pattern: &str,
        handler: H,
    ) -> Result<Subscription, BusError> {
        if !channels::is_wildcard(pattern) && pattern.contains(&['*', '?', '['][..]) {
            tracing::debug!(pattern, "Glob patterns are not supported, matching literally");
        }
        self.subscribe(pattern, handler).await
    }

    /// Cancel `subscription`, drop it from its channel bucket and release
    /// its queue.
    ///
    /// Returns [`BusError::UnknownSubscription`] without side effects if the
    /// handle is not registered (already unsubscribed, or released by
    /// shutdown).
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), BusError> {
        let entry = self
            .inner
            .registry
            .remove(subscription.id())
            .await
            .ok_or_else(|| BusError::UnknownSubscription(subscription.id().to_string()))?;

        entry.subscription.cancel();
        tracing::info!(
            subscription_id = subscription.id(),
            channel = subscription.channel(),
            "Unsubscribed"
        );
        Ok(())
    }

    // -- Introspection ------------------------------------------------------

    /// Whether `channel` currently has at least one subscriber.
    pub async fn channel_exists(&self, channel: &str) -> bool {
        self.inner.registry.channel_exists(channel).await
    }

    /// Channels with subscribers, sorted.
    pub async fn list_channels(&self) -> Vec<String> {
        self.inner.registry.list_channels().await
    }

    /// Number of subscriptions registered on exactly `channel`.
    pub async fn subscription_count(&self, channel: &str) -> usize {
        self.inner.registry.subscription_count(channel).await
    }

    /// Aggregate registry, cursor, store and counter figures.
    pub async fn stats(&self) -> Result<BusStats, BusError> {
        let counts = self.inner.registry.counts().await;
        let stored_messages = self.inner.store.count().await?;
        let store_size_bytes = self.inner.store.size_bytes().await?;

        Ok(BusStats {
            total_subscriptions: counts.total,
            total_channels: counts.channels.len(),
            channels: counts.channels,
            stored_messages,
            cursor: self.inner.cursor.position(),
            store_size_bytes,
            counters: self.inner.counters.snapshot(),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // -- Shutdown -----------------------------------------------------------

    /// Shut down: cancel every subscription, stop the poller and sweeper,
    /// wait for them (bounded by `shutdown_timeout`), then close the store.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let released = self.inner.registry.close().await;
        for entry in &released {
            entry.subscription.cancel();
        }
        drop(released);

        self.inner.shutdown.cancel();
        self.inner.tasks.close();

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.inner.tasks.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for bus tasks to stop"
            );
        }

        self.inner.store.close().await;
        tracing::info!("Message bus closed");
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}
