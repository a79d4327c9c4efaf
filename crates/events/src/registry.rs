//! Subscription registry: the single owner of `channel → subscriptions`.
//!
//! Both maps live behind one `RwLock`. Dispatch takes the read lock only
//! long enough to snapshot delivery targets; subscribe, unsubscribe and
//! shutdown take the write lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use pollbus_core::channels::{is_wildcard, WILDCARD_CHANNEL};
use tokio::sync::{mpsc, RwLock};

use crate::error::BusError;
use crate::message::Message;
use crate::subscription::Subscription;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Producer half of a subscription's bounded delivery queue.
pub(crate) type QueueSender = mpsc::Sender<Arc<Message>>;

/// A registered subscription together with its queue.
#[derive(Clone)]
pub(crate) struct Entry {
    pub subscription: Subscription,
    pub sender: QueueSender,
}

#[derive(Default)]
struct Inner {
    /// channel → subscription ids. Empty buckets are removed.
    channels: HashMap<String, HashSet<String>>,
    /// subscription id → entry.
    subscriptions: HashMap<String, Entry>,
    closed: bool,
}

impl Inner {
    fn bucket(&self, channel: &str) -> impl Iterator<Item = &Entry> {
        self.channels
            .get(channel)
            .into_iter()
            .flatten()
            .filter_map(|id| self.subscriptions.get(id))
    }

    /// Every entry that should see a message published on `channel`.
    fn targets(&self, channel: &str) -> Vec<Entry> {
        if is_wildcard(channel) {
            return self.subscriptions.values().cloned().collect();
        }
        self.bucket(channel)
            .chain(self.bucket(WILDCARD_CHANNEL))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription to its channel bucket.
    ///
    /// Fails with [`BusError::Closed`] once [`Registry::close`] has run, so
    /// nothing can register after shutdown has drained the maps.
    pub async fn insert(&self, entry: Entry) -> Result<(), BusError> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(BusError::Closed);
        }
        let id = entry.subscription.id().to_string();
        inner
            .channels
            .entry(entry.subscription.channel().to_string())
            .or_default()
            .insert(id.clone());
        inner.subscriptions.insert(id, entry);
        Ok(())
    }

    /// Remove a subscription, dropping its bucket if it becomes empty.
    pub async fn remove(&self, id: &str) -> Option<Entry> {
        let mut inner = self.inner.write().await;
        let entry = inner.subscriptions.remove(id)?;
        let channel = entry.subscription.channel();
        if let Some(bucket) = inner.channels.get_mut(channel) {
            bucket.remove(id);
            if bucket.is_empty() {
                inner.channels.remove(channel);
            }
        }
        Some(entry)
    }

    /// Refuse further inserts and hand back everything registered.
    pub async fn close(&self) -> Vec<Entry> {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        inner.channels.clear();
        inner.subscriptions.drain().map(|(_, entry)| entry).collect()
    }

    /// Snapshot delivery targets for each message of a batch under a single
    /// read lock. The returned vector is parallel to `batch`.
    pub async fn resolve(&self, batch: &[Arc<Message>]) -> Vec<Vec<Entry>> {
        let inner = self.inner.read().await;
        batch.iter().map(|msg| inner.targets(&msg.channel)).collect()
    }

    pub async fn channel_exists(&self, channel: &str) -> bool {
        self.inner.read().await.channels.contains_key(channel)
    }

    /// Channels with at least one subscriber, sorted.
    pub async fn list_channels(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut channels: Vec<String> = inner.channels.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub async fn subscription_count(&self, channel: &str) -> usize {
        self.inner
            .read()
            .await
            .channels
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Per-channel and total subscriber counts, read under one lock so the
    /// total always equals the sum of the channel counts.
    pub async fn counts(&self) -> RegistryCounts {
        let inner = self.inner.read().await;
        RegistryCounts {
            channels: inner
                .channels
                .iter()
                .map(|(channel, ids)| (channel.clone(), ids.len()))
                .collect(),
            total: inner.subscriptions.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// Point-in-time subscriber counts from [`Registry::counts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RegistryCounts {
    pub channels: BTreeMap<String, usize>,
    pub total: usize,
}
