//! Durable publish/subscribe message bus.
//!
//! Messages are appended to a persistent log ([`MessageStore`]) and picked
//! up by a single poller, which fans each one out to the bounded queues of
//! every matching subscription. One delivery worker per subscription runs
//! the handler, so a slow or failing handler only affects itself. A
//! retention sweeper expires old messages.
//!
//! - [`MessageBus`]: publish, subscribe, introspect, shut down.
//! - [`MessageStore`]: storage seam, with [`PgMessageStore`] and
//!   [`MemoryMessageStore`] implementations.
//! - [`Handler`] / [`handler_fn`]: subscriber callbacks.
//! - [`BusConfig`]: intervals, batch size, queue capacity, retention.
//!
//! Delivery is at-most-once per subscriber: a message that arrives while a
//! subscriber's queue is full is dropped for that subscriber.

pub mod bus;
pub mod config;
mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
mod poller;
mod registry;
pub mod stats;
pub mod store;
pub mod subscription;
mod sweeper;
mod worker;

pub use bus::MessageBus;
pub use config::BusConfig;
pub use error::{BusError, StoreError};
pub use handler::{handler_fn, FnHandler, Handler, HandlerContext};
pub use message::{Message, Metadata};
pub use stats::{BusStats, CounterSnapshot};
pub use store::{MemoryMessageStore, MessageStore, PgMessageStore};
pub use subscription::{Subscription, SubscriptionState};
