//! Volatile in-process log, used by tests and single-process embedding.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use pollbus_core::types::{DbId, Timestamp};

use crate::error::StoreError;
use crate::message::{Message, Metadata};

use super::MessageStore;

/// [`MessageStore`] backed by an ordered map.
///
/// Ids start at 1 and are never reused, matching a database sequence.
/// Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    log: Mutex<MemoryLog>,
}

#[derive(Debug, Default)]
struct MemoryLog {
    last_id: DbId,
    messages: BTreeMap<DbId, Message>,
    closed: bool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> Result<MutexGuard<'_, MemoryLog>, StoreError> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.closed {
            return Err(StoreError::Closed);
        }
        Ok(log)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(
        &self,
        channel: &str,
        payload: &serde_json::Value,
        metadata: &Metadata,
    ) -> Result<DbId, StoreError> {
        let mut log = self.open()?;
        log.last_id += 1;
        let id = log.last_id;
        log.messages.insert(
            id,
            Message {
                id,
                channel: channel.to_string(),
                payload: payload.clone(),
                metadata: metadata.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn query_since(&self, last_id: DbId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let log = self.open()?;
        Ok(log
            .messages
            .range(last_id.saturating_add(1)..)
            .take(limit)
            .map(|(_, msg)| msg.clone())
            .collect())
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut log = self.open()?;
        let before = log.messages.len();
        log.messages.retain(|_, msg| msg.created_at >= cutoff);
        Ok((before - log.messages.len()) as u64)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.open()?.messages.len() as i64)
    }

    async fn latest_id(&self) -> Result<DbId, StoreError> {
        Ok(self
            .open()?
            .messages
            .last_key_value()
            .map(|(id, _)| *id)
            .unwrap_or(0))
    }

    /// Sum of channel, encoded payload and metadata lengths.
    async fn size_bytes(&self) -> Result<Option<i64>, StoreError> {
        let log = self.open()?;
        let total: usize = log
            .messages
            .values()
            .map(|msg| {
                msg.channel.len()
                    + msg.payload.to_string().len()
                    + msg
                        .metadata
                        .iter()
                        .map(|(k, v)| k.len() + v.len())
                        .sum::<usize>()
            })
            .sum();
        Ok(Some(total as i64))
    }

    async fn close(&self) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.closed = true;
        log.messages.clear();
    }
}
