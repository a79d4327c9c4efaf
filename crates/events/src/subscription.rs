//! Subscription handles and their lifecycle.
//!
//! ```text
//! Created ──worker start──► Active ──unsubscribe / shutdown──► Cancelling ──worker exit──► Closed
//! ```
//!
//! A subscription can also go `Created → Cancelling` if it is cancelled
//! before its worker gets scheduled. `Closed` is terminal.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Process-wide tie-breaker for ids created within the same nanosecond.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SubscriptionState {
    Created = 0,
    Active = 1,
    Cancelling = 2,
    Closed = 3,
}

impl SubscriptionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::Cancelling,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Cancelling => "cancelling",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Handle to a live registration, returned by `subscribe`.
///
/// Cheap to clone; every clone observes the same state. Pass it to
/// [`MessageBus::unsubscribe`](crate::MessageBus::unsubscribe) to stop
/// delivery.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    channel: String,
    state: AtomicU8,
    /// Fires on unsubscribe or bus shutdown.
    cancel: CancellationToken,
    /// Fires once the delivery worker has exited.
    done: CancellationToken,
}

impl Subscription {
    /// Create a handle whose cancellation is tied to `parent`.
    pub(crate) fn new(channel: &str, parent: &CancellationToken) -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);

        Self {
            inner: Arc::new(Inner {
                id: format!("{channel}-{nanos}-{seq}"),
                channel: channel.to_string(),
                state: AtomicU8::new(SubscriptionState::Created as u8),
                cancel: parent.child_token(),
                done: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Resolve once the delivery worker has stopped.
    pub async fn closed(&self) {
        self.inner.done.cancelled().await;
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// `Created → Active`. No-op if cancellation already started.
    pub(crate) fn mark_active(&self) {
        let _ = self.inner.state.compare_exchange(
            SubscriptionState::Created as u8,
            SubscriptionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move to `Cancelling` (unless already closed) and fire the token.
    pub(crate) fn cancel(&self) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match SubscriptionState::from_u8(current) {
                    SubscriptionState::Created | SubscriptionState::Active => {
                        Some(SubscriptionState::Cancelling as u8)
                    }
                    _ => None,
                }
            });
        self.inner.cancel.cancel();
    }

    /// Terminal transition, performed by the worker on exit.
    pub(crate) fn mark_closed(&self) {
        self.inner
            .state
            .store(SubscriptionState::Closed as u8, Ordering::Release);
        self.inner.done.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel)
            .field("state", &self.state())
            .finish()
    }
}
