//! PostgreSQL adapter over [`MessageRepo`].

use async_trait::async_trait;
use pollbus_core::types::{DbId, Timestamp};
use pollbus_db::models::message::MessageRow;
use pollbus_db::repositories::MessageRepo;
use pollbus_db::DbPool;

use crate::error::StoreError;
use crate::message::{Message, Metadata};

use super::MessageStore;

/// [`MessageStore`] persisting to the `bus_messages` table.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    /// Wrap an existing pool. Migrations are assumed to be applied.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connect, verify the server answers, and apply pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = pollbus_db::create_pool(database_url).await?;
        pollbus_db::health_check(&pool).await?;
        pollbus_db::run_migrations(&pool).await?;
        tracing::info!("Message store connected and migrated");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(
        &self,
        channel: &str,
        payload: &serde_json::Value,
        metadata: &Metadata,
    ) -> Result<DbId, StoreError> {
        let metadata = if metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_value(metadata)?)
        };
        Ok(MessageRepo::insert(&self.pool, channel, payload, metadata.as_ref()).await?)
    }

    async fn query_since(&self, last_id: DbId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = MessageRepo::list_since(&self.pool, last_id, limit).await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        Ok(MessageRepo::delete_older_than(&self.pool, cutoff).await?)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(MessageRepo::count(&self.pool).await?)
    }

    async fn latest_id(&self) -> Result<DbId, StoreError> {
        Ok(MessageRepo::latest_id(&self.pool).await?)
    }

    async fn size_bytes(&self) -> Result<Option<i64>, StoreError> {
        Ok(Some(MessageRepo::table_size_bytes(&self.pool).await?))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Infallible, so one malformed row cannot stall the poller's cursor.
impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let metadata = metadata_from_json(row.id, row.metadata);
        Message {
            id: row.id,
            channel: row.channel,
            payload: row.data,
            metadata,
            created_at: row.created_at,
        }
    }
}

/// Flatten a stored metadata document into a string map.
///
/// Non-string values keep their JSON text. Anything other than an object
/// is logged and read back as empty metadata.
fn metadata_from_json(message_id: DbId, value: Option<serde_json::Value>) -> Metadata {
    match value {
        None | Some(serde_json::Value::Null) => Metadata::new(),
        Some(serde_json::Value::Object(fields)) => fields
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect(),
        Some(other) => {
            tracing::warn!(
                message_id,
                metadata = %other,
                "Ignoring metadata that is not a JSON object"
            );
            Metadata::new()
        }
    }
}
