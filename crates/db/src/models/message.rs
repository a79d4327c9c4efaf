//! Durable bus message row.

use pollbus_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `bus_messages` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageRow {
    pub id: DbId,
    pub channel: String,
    pub data: serde_json::Value,
    /// JSON object of string pairs, `NULL` when the publisher attached none.
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
}
