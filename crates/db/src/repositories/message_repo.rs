//! Repository for the `bus_messages` table.

use pollbus_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::message::MessageRow;

/// Column list for `bus_messages` queries.
const COLUMNS: &str = "id, channel, data, metadata, created_at";

/// Append, scan and expire operations over the durable message log.
pub struct MessageRepo;

impl MessageRepo {
    /// Append a message, returning the id assigned by the sequence.
    pub async fn insert(
        pool: &PgPool,
        channel: &str,
        data: &serde_json::Value,
        metadata: Option<&serde_json::Value>,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO bus_messages (channel, data, metadata) \
             VALUES ($1, $2, $3) \
             RETURNING id",
        )
        .bind(channel)
        .bind(data)
        .bind(metadata)
        .fetch_one(pool)
        .await
    }

    /// Messages with `id > last_id`, oldest first, at most `limit` rows.
    pub async fn list_since(
        pool: &PgPool,
        last_id: DbId,
        limit: i64,
    ) -> Result<Vec<MessageRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM bus_messages WHERE id > $1 ORDER BY id ASC LIMIT $2");
        sqlx::query_as::<_, MessageRow>(&query)
            .bind(last_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete every message created before `cutoff`. Returns rows removed.
    pub async fn delete_older_than(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM bus_messages WHERE created_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of messages currently retained.
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM bus_messages")
            .fetch_one(pool)
            .await
    }

    /// Highest id currently in the table, or `0` when it is empty.
    pub async fn latest_id(pool: &PgPool) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar("SELECT COALESCE(MAX(id), 0)::BIGINT FROM bus_messages")
            .fetch_one(pool)
            .await
    }

    /// On-disk size of the table including indexes and TOAST, in bytes.
    pub async fn table_size_bytes(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT pg_total_relation_size('bus_messages')::BIGINT")
            .fetch_one(pool)
            .await
    }
}
