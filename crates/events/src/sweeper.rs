//! Periodic deletion of messages older than the retention window.
//!
//! The sweeper is the only deletion path. It does not know or care whether
//! a message was ever polled or delivered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use pollbus_core::types::Timestamp;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store::MessageStore;

pub(crate) struct RetentionSweeper {
    store: Arc<dyn MessageStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MessageStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Sweep every `interval` until `cancel` fires. The first sweep runs
    /// immediately.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Retention sweeper started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retention sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(deleted) if deleted > 0 => {
                            tracing::info!(deleted, "Retention sweep purged expired messages");
                        }
                        Ok(_) => tracing::debug!("Retention sweep: nothing to purge"),
                        Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                    }
                }
            }
        }
    }

    /// Delete everything older than the retention window as of now.
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        self.store
            .delete_older_than(cutoff(Utc::now(), self.retention))
            .await
    }
}

/// `now - retention`, clamped to the earliest representable instant.
fn cutoff(now: Timestamp, retention: Duration) -> Timestamp {
    TimeDelta::from_std(retention)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
