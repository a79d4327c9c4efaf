//! The durable message envelope handed to subscribers.

use std::collections::HashMap;

use pollbus_core::types::{DbId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Free-form string pairs carried next to the payload. Never used for
/// routing.
pub type Metadata = HashMap<String, String>;

/// A message read back from the log.
///
/// Immutable once written: the store assigns `id` and `created_at`, and the
/// only later change is deletion by the retention sweeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned, strictly increasing. The only total order the bus
    /// guarantees.
    pub id: DbId,

    /// Channel the message was published to; `"*"` for broadcasts.
    pub channel: String,

    /// JSON-encoded payload. The bus never inspects it.
    pub payload: serde_json::Value,

    /// Publisher-supplied metadata; empty when none was attached.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,

    /// Insert time, consulted only by the retention sweeper.
    pub created_at: Timestamp,
}

impl Message {
    /// Decode the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Look up a single metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Whether this message was published to the broadcast channel.
    pub fn is_broadcast(&self) -> bool {
        pollbus_core::channels::is_wildcard(&self.channel)
    }
}
