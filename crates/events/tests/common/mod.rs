//! Shared helpers for bus integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pollbus_core::types::{DbId, Timestamp};
use pollbus_events::{
    handler_fn, BusConfig, Handler, MemoryMessageStore, Message, MessageBus, MessageStore,
    Metadata, StoreError,
};
use tokio::sync::mpsc;

/// Fast intervals so tests observe delivery within a few milliseconds.
pub fn test_config() -> BusConfig {
    BusConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 100,
        queue_capacity: 64,
        sweep_interval: Duration::from_secs(3600),
        retention: Duration::from_secs(3600),
        shutdown_timeout: Duration::from_secs(2),
    }
}

pub async fn start_bus(config: BusConfig) -> (MessageBus, Arc<MemoryMessageStore>) {
    let store = Arc::new(MemoryMessageStore::new());
    let bus = MessageBus::start(Arc::clone(&store) as Arc<dyn MessageStore>, config)
        .await
        .expect("bus should start");
    (bus, store)
}

/// Handler that forwards every message it sees to the returned receiver.
pub fn recorder() -> (impl Handler, mpsc::UnboundedReceiver<Arc<Message>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |_ctx, msg| {
        let tx = tx.clone();
        async move {
            tx.send(msg).ok();
            anyhow::Ok(())
        }
    });
    (handler, rx)
}

/// Receive exactly `n` messages or panic after a generous timeout.
pub async fn recv_n(rx: &mut mpsc::UnboundedReceiver<Arc<Message>>, n: usize) -> Vec<Arc<Message>> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out after {} of {n} messages", out.len()))
            .expect("handler channel closed");
        out.push(msg);
    }
    out
}

/// Assert nothing arrives within a few poll intervals.
///
/// A closed channel counts as silence: an unsubscribed worker drops its
/// handler, and with it the recorder's sender.
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Arc<Message>>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(
        !matches!(result, Ok(Some(_))),
        "expected no delivery, got {result:?}"
    );
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Memory store whose first `failures` scans fail with a database error.
pub struct FlakyStore {
    inner: MemoryMessageStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_scans(failures: usize) -> Self {
        Self {
            inner: MemoryMessageStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn remaining_failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(
        &self,
        channel: &str,
        payload: &serde_json::Value,
        metadata: &Metadata,
    ) -> Result<DbId, StoreError> {
        self.inner.insert(channel, payload, metadata).await
    }

    async fn query_since(&self, last_id: DbId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.query_since(last_id, limit).await
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        self.inner.delete_older_than(cutoff).await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.inner.count().await
    }

    async fn latest_id(&self) -> Result<DbId, StoreError> {
        self.inner.latest_id().await
    }
}
