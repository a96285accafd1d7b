//! One-to-many synchronous notification.
//!
//! [`Broadcaster`] replaces a toolkit signal/slot connection: listeners are
//! kept in registration order and [`Broadcaster::publish`] calls each one on
//! the publishing thread with the same shared reference.
//!
//! A listener that returns an error or panics is logged and skipped; the
//! remaining listeners still receive the item.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use async_microphone::pipeline::Broadcaster;
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//!
//! let numbers = Broadcaster::<u32>::new("numbers");
//! numbers.subscribe(move |n: &u32| {
//!     sink.lock().unwrap().push(*n);
//!     Ok(())
//! });
//!
//! numbers.publish(&1);
//! numbers.publish(&2);
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Receiver of items published by a [`Broadcaster`].
///
/// Implemented for every `Fn(&T) -> anyhow::Result<()>` closure that is
/// `Send + Sync`, so most callers never name this trait.
pub trait Listener<T>: Send + Sync {
    /// Handle one published item.
    fn notify(&self, item: &T) -> anyhow::Result<()>;
}

impl<T, F> Listener<T> for F
where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync,
{
    fn notify(&self, item: &T) -> anyhow::Result<()> {
        self(item)
    }
}

// ---------------------------------------------------------------------------
// SubscriptionId
// ---------------------------------------------------------------------------

/// Handle returned by [`Broadcaster::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

type Entry<T> = (SubscriptionId, Arc<dyn Listener<T>>);

/// Ordered list of listeners with per-listener failure isolation.
pub struct Broadcaster<T> {
    /// Used only to label log lines.
    name: &'static str,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Entry<T>>>,
}

impl<T> Broadcaster<T> {
    /// Create an empty broadcaster.  `name` appears in log output.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Append `listener` to the end of the delivery order.
    ///
    /// The same closure may be subscribed more than once; each subscription
    /// is delivered independently.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: Listener<T> + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    /// Like [`subscribe`](Self::subscribe) for an already shared listener.
    pub fn subscribe_arc(&self, listener: Arc<dyn Listener<T>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        log::debug!("{}: listener {id} subscribed", self.name);
        id
    }

    /// Remove a subscription.  Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(entry_id, _)| *entry_id != id);
        before != listeners.len()
    }

    /// Deliver `item` to every listener in registration order.
    ///
    /// Runs synchronously on the calling thread.  The listener list is
    /// snapshotted first, so listeners may subscribe or unsubscribe from
    /// inside a callback; such changes take effect on the next publish.
    ///
    /// Returns the number of listeners that handled the item successfully.
    pub fn publish(&self, item: &T) -> usize {
        let snapshot: Vec<Entry<T>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.notify(item))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    log::warn!("{}: listener {id} failed: {e:#}", self.name);
                }
                Err(_) => {
                    log::error!("{}: listener {id} panicked", self.name);
                }
            }
        }
        delivered
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
