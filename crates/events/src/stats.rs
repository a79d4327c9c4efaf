//! Read-only introspection over the registry, the cursor and the store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use pollbus_core::types::DbId;
use serde::Serialize;

/// Process-lifetime counters, updated lock-free from the hot path.
#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

impl BusCounters {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BusCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Successful `publish` calls made through this bus instance.
    pub published: u64,
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Messages not enqueued because a subscriber's queue was full.
    pub dropped: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
}

/// Snapshot returned by [`MessageBus::stats`](crate::MessageBus::stats).
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub total_subscriptions: usize,
    pub total_channels: usize,
    /// Subscriber count per channel bucket, including `"*"`.
    pub channels: BTreeMap<String, usize>,
    /// Messages currently retained by the store.
    pub stored_messages: i64,
    /// Last message id consumed by the poller.
    pub cursor: DbId,
    /// Store footprint, when the backend reports one.
    pub store_size_bytes: Option<i64>,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
}
