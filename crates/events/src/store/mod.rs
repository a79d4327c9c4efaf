//! Storage seam for the durable message log.
//!
//! The bus only needs an ordered, keyed, append-only log. Anything that can
//! answer the methods of [`MessageStore`] can back it; polling is the only
//! coordination the bus performs, so a backend with native change
//! notification can slot in behind the same trait.

use async_trait::async_trait;
use pollbus_core::types::{DbId, Timestamp};

use crate::error::StoreError;
use crate::message::{Message, Metadata};

pub mod memory;
pub mod postgres;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;

/// Durable, ordered message log shared by the publisher, poller and sweeper.
///
/// Implementations must tolerate concurrent calls from all three.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message and return its id once the write is durable.
    async fn insert(
        &self,
        channel: &str,
        payload: &serde_json::Value,
        metadata: &Metadata,
    ) -> Result<DbId, StoreError>;

    /// Messages with `id > last_id` in ascending id order, at most `limit`.
    async fn query_since(&self, last_id: DbId, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Remove messages created before `cutoff`, returning how many went.
    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    /// Number of messages currently retained.
    async fn count(&self) -> Result<i64, StoreError>;

    /// Highest id present, `0` when the log is empty.
    async fn latest_id(&self) -> Result<DbId, StoreError>;

    /// Approximate storage footprint, if the backend can tell.
    async fn size_bytes(&self) -> Result<Option<i64>, StoreError> {
        Ok(None)
    }

    /// Release the underlying handle. Called once during bus shutdown.
    async fn close(&self) {}
}
