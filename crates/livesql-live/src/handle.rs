//! Subscription handles.
//!
//! A handle is the consumer's view of one live query. It holds the last
//! delivered results and the consumer's callbacks, but never the live query
//! record itself: every operation goes back through the registry by id.

use crate::registry::RegistryInner;
use livesql_core::{Delta, DiffKey, ResultSnapshot};
use livesql_core_types::{HandleId, LiveQueryId, SubscriberId};
use livesql_errors::{LiveError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

/// Results delivered to a handle.
#[derive(Debug, Clone)]
pub struct LiveResults {
    pub snapshot: Arc<ResultSnapshot>,
    /// Row changes since the previous delivery; keyed queries only
    pub delta: Option<Arc<Delta>>,
}

impl LiveResults {
    pub(crate) fn empty() -> Self {
        Self {
            snapshot: Arc::new(ResultSnapshot::empty()),
            delta: None,
        }
    }
}

/// What a subscriber callback receives.
pub type LiveUpdate = Result<LiveResults>;

pub type Callback = Arc<dyn Fn(&LiveUpdate) + Send + Sync>;

/// Handle state shared with the registry.
pub(crate) struct HandleShared {
    pub(crate) id: HandleId,
    pub(crate) live_id: LiveQueryId,
    pub(crate) key: Option<DiffKey>,
    current: Mutex<LiveResults>,
    disposed: AtomicBool,
    detached: AtomicBool,
    /// Held for the disposed check and the callback call together
    delivery: Mutex<()>,
    /// Thread currently running this handle's callbacks
    delivering: Mutex<Option<ThreadId>>,
}

impl HandleShared {
    pub(crate) fn new(live_id: LiveQueryId, key: Option<DiffKey>) -> Self {
        Self {
            id: HandleId::next(),
            live_id,
            key,
            current: Mutex::new(LiveResults::empty()),
            disposed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            delivery: Mutex::new(()),
            delivering: Mutex::new(None),
        }
    }

    pub(crate) fn set_current(&self, results: LiveResults) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = results;
    }

    pub(crate) fn current(&self) -> LiveResults {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns `true` for the call that actually disposed.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    /// Run `f` unless the handle is disposed.
    ///
    /// Returns `None` when skipped. A concurrent [`wait_for_delivery`]
    /// cannot return while `f` runs.
    ///
    /// [`wait_for_delivery`]: Self::wait_for_delivery
    pub(crate) fn deliver<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _guard = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_disposed() {
            return None;
        }
        self.set_delivering(Some(thread::current().id()));
        let out = f();
        self.set_delivering(None);
        Some(out)
    }

    /// Block until no callback of this handle is running, unless the caller
    /// is that callback.
    pub(crate) fn wait_for_delivery(&self) {
        let current = thread::current().id();
        let reentrant = *self.delivering.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(current);
        if !reentrant {
            drop(self.delivery.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    fn set_delivering(&self, thread: Option<ThreadId>) {
        *self.delivering.lock().unwrap_or_else(PoisonError::into_inner) = thread;
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

/// Consumer handle for one live query.
///
/// Dropping the handle disposes it.
pub struct SubscriptionHandle {
    shared: Arc<HandleShared>,
    registry: Weak<RegistryInner>,
}

impl SubscriptionHandle {
    pub(crate) fn new(shared: Arc<HandleShared>, registry: Weak<RegistryInner>) -> Self {
        Self { shared, registry }
    }

    pub fn id(&self) -> HandleId {
        self.shared.id
    }

    pub fn live_id(&self) -> LiveQueryId {
        self.shared.live_id
    }

    /// Row identity column for incremental queries.
    pub fn key(&self) -> Option<&DiffKey> {
        self.shared.key.as_ref()
    }

    /// Last delivered results.
    ///
    /// Keeps returning the last good results after a failed re-run, after
    /// disposal and after the live query was torn down.
    pub fn current(&self) -> LiveResults {
        self.shared.current()
    }

    /// Register a callback for future updates.
    ///
    /// Callbacks run on the serializer worker, in registration order. A
    /// callback may submit statements but must not block waiting for them.
    ///
    /// # Errors
    ///
    /// `Disposed` after [`dispose`](Self::dispose); `Detached` once the
    /// live query has been torn down.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriberId>
    where
        F: Fn(&LiveUpdate) + Send + Sync + 'static,
    {
        if self.shared.is_disposed() {
            return Err(LiveError::HandleDisposed {
                handle: self.shared.id.to_string(),
            }
            .into());
        }
        let registry = self.registry()?;
        registry.subscribe(&self.shared, Arc::new(callback))
    }

    /// Remove a callback. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, subscriber: SubscriberId) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.shared, subscriber);
        }
    }

    /// Schedule a re-run of this handle's query.
    ///
    /// # Errors
    ///
    /// `Disposed` or `Detached` as for [`subscribe`](Self::subscribe).
    pub fn refresh(&self) -> Result<()> {
        if self.shared.is_disposed() {
            return Err(LiveError::HandleDisposed {
                handle: self.shared.id.to_string(),
            }
            .into());
        }
        self.registry()?.refresh(&self.shared)
    }

    /// Stop all delivery to this handle. Idempotent.
    ///
    /// Once this returns no callback of this handle is running or will start,
    /// except the calling callback itself when a callback disposes its own
    /// handle. A run already queued for the query is not cancelled.
    pub fn dispose(&self) {
        if !self.shared.mark_disposed() {
            return;
        }
        self.shared.wait_for_delivery();
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.shared);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Whether the underlying live query is no longer registered.
    pub fn is_detached(&self) -> bool {
        self.shared.is_detached() || self.registry.strong_count() == 0
    }

    fn registry(&self) -> Result<Arc<RegistryInner>> {
        match self.registry.upgrade() {
            Some(registry) if !self.shared.is_detached() => Ok(registry),
            _ => Err(LiveError::LiveQueryDetached {
                live_id: self.shared.live_id,
            }
            .into()),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.shared.id)
            .field("live_id", &self.shared.live_id)
            .field("key", &self.shared.key)
            .field("disposed", &self.shared.is_disposed())
            .finish()
    }
}
