//! Error types for the bus and its storage backends.

/// Failures raised by a [`MessageStore`](crate::store::MessageStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be turned back into a [`Message`](crate::Message).
    #[error("Malformed stored message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Message store is closed")]
    Closed,
}

/// Errors returned synchronously by [`MessageBus`](crate::MessageBus)
/// operations.
///
/// Background loops (poller, sweeper, delivery workers) never produce these;
/// their failures are logged and retried on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Channel name must not be empty")]
    EmptyChannel,

    /// The handle does not belong to a live registration, e.g. it was
    /// already unsubscribed or released by shutdown.
    #[error("Subscription is not registered: {0}")]
    UnknownSubscription(String),

    #[error("Message bus is closed")]
    Closed,

    #[error("Invalid bus configuration: {0}")]
    Config(String),

    #[error("Failed to encode payload: {0}")]
    Codec(#[source] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
