//! Real-time core: channel subscription, event reconciliation, and session lifecycle.

pub mod backoff;
pub mod ids;
pub mod reconciler;
pub mod session;
pub mod subscriber;

pub use backoff::Backoff;
pub use ids::{SequenceIds, ToastIdGenerator, UuidIds};
pub use reconciler::{Change, Reconciler, ReconcilerBuilder};
pub use session::{LiveSession, SessionOptions};
pub use subscriber::{ChannelSubscriber, LinkStatus, Subscription};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// State behind these locks stays consistent across a panicking handler, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
