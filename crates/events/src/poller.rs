//! The poller: the only reader of new messages and the only writer of the
//! cursor.
//!
//! Each tick reads at most `batch_size` messages with `id > cursor`,
//! advances the cursor to the highest id read, and hands the batch to the
//! [`Dispatcher`]. A failed read is logged and retried on the next tick.
//! The cursor lives in memory only; a fresh process starts from the
//! store's current maximum id, so nothing is redelivered after a restart.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pollbus_core::types::DbId;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::store::MessageStore;

/// Last message id consumed by the poller.
///
/// Clones share the same position. Only this module can move it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cursor(Arc<AtomicI64>);

impl Cursor {
    pub fn starting_at(id: DbId) -> Self {
        Self(Arc::new(AtomicI64::new(id)))
    }

    pub fn position(&self) -> DbId {
        self.0.load(Ordering::Acquire)
    }

    fn advance_to(&self, id: DbId) {
        self.0.fetch_max(id, Ordering::AcqRel);
    }
}

pub(crate) struct Poller {
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    cursor: Cursor,
    batch_size: usize,
    interval: Duration,
}

impl Poller {
    pub fn new(
        store: Arc<dyn MessageStore>,
        dispatcher: Dispatcher,
        cursor: Cursor,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            cursor,
            batch_size,
            interval,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            cursor = self.cursor.position(),
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Poller started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(cursor = self.cursor.position(), "Poller stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(
                            error = %e,
                            cursor = self.cursor.position(),
                            "Poll failed, retrying next tick"
                        );
                    }
                }
            }
        }
    }

    /// Read and dispatch one batch. Returns the number of messages read.
    pub async fn poll_once(&self) -> Result<usize, StoreError> {
        let batch = self
            .store
            .query_since(self.cursor.position(), self.batch_size)
            .await?;

        let Some(max_id) = batch.iter().map(|m| m.id).max() else {
            return Ok(0);
        };
        self.cursor.advance_to(max_id);

        let read = batch.len();
        let outcome = self.dispatcher.dispatch(batch).await;
        tracing::debug!(
            read,
            cursor = max_id,
            enqueued = outcome.enqueued,
            dropped = outcome.dropped,
            "Dispatched batch"
        );
        Ok(read)
    }
}
