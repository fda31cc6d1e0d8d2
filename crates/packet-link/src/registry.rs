//! # Listener Registry
//!
//! Thread-safe mapping from packet kind to an ordered collection of
//! listeners, with fan-out dispatch from the transport's receive path.
//!
//! ## Concurrency
//!
//! One `RwLock` guards the whole map. `dispatch` snapshots the per-kind
//! listener list under the read lock and invokes callbacks after releasing
//! it, so listeners may call back into `add`/`remove`/`clear` without
//! deadlocking. A listener added while a dispatch is iterating its snapshot
//! is only visible to dispatches that start afterwards; a listener removed
//! mid-dispatch may observe that one already-snapshotted packet, never two.
//!
//! ## Failure Isolation
//!
//! A listener that returns `Err` or panics must not prevent the remaining
//! listeners from running, and must not disturb the receive path. Failures
//! are counted, logged, and forwarded to the optional failure hook.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::ListenerError;
use crate::packet::Packet;

/// Callback invoked for every dispatched packet of the registered kind.
///
/// Runs synchronously on the dispatching thread (typically the transport's
/// receive path) and must therefore be fast and non-blocking.
pub type ListenerFn<P> = dyn Fn(&P) -> Result<(), ListenerError> + Send + Sync;

/// Hook receiving every contained listener failure.
pub type FailureHook<P> = dyn Fn(<P as Packet>::Kind, &ListenerError) + Send + Sync;

/// Opaque handle identifying one registration.
///
/// Returned by [`ListenerRegistry::add`]; removal takes the handle, never
/// closure identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct RegisteredListener<P: Packet> {
    id: ListenerId,
    callback: Arc<ListenerFn<P>>,
}

impl<P: Packet> Clone for RegisteredListener<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Counters for dispatch activity.
#[derive(Debug, Default)]
struct RegistryMetrics {
    packets_dispatched: AtomicU64,
    deliveries: AtomicU64,
    listener_failures: AtomicU64,
}

/// Point-in-time snapshot of [`ListenerRegistry`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Packets pushed through `dispatch`.
    pub packets_dispatched: u64,
    /// Successful listener invocations.
    pub deliveries: u64,
    /// Listener invocations that failed or panicked.
    pub listener_failures: u64,
}

/// Thread-safe kind → listeners map with fan-out dispatch.
pub struct ListenerRegistry<P: Packet> {
    listeners: RwLock<HashMap<P::Kind, Vec<RegisteredListener<P>>>>,
    next_id: AtomicU64,
    metrics: RegistryMetrics,
    failure_hook: RwLock<Option<Arc<FailureHook<P>>>>,
}

impl<P: Packet> ListenerRegistry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            metrics: RegistryMetrics::default(),
            failure_hook: RwLock::new(None),
        }
    }

    /// Register a listener for `kind`.
    ///
    /// The listener is visible to every dispatch that starts strictly after
    /// this call returns. Returns the handle used for later removal.
    pub fn add<F>(&self, kind: P::Kind, listener: F) -> ListenerId
    where
        F: Fn(&P) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = RegisteredListener {
            id,
            callback: Arc::new(listener),
        };
        self.listeners.write().entry(kind).or_default().push(entry);
        debug!(kind = ?kind, listener = ?id, "listener registered");
        id
    }

    /// Remove the listener registered under `id`, if present.
    ///
    /// Idempotent: removing twice returns `false` the second time. Other
    /// listeners for the kind are untouched.
    pub fn remove(&self, kind: P::Kind, id: ListenerId) -> bool {
        let mut map = self.listeners.write();
        let Some(entries) = map.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            map.remove(&kind);
        }
        drop(map);

        if removed {
            debug!(kind = ?kind, listener = ?id, "listener removed");
        }
        removed
    }

    /// Remove all listeners for `kind`.
    pub fn clear(&self, kind: P::Kind) {
        let removed = self
            .listeners
            .write()
            .remove(&kind)
            .map_or(0, |entries| entries.len());
        if removed > 0 {
            debug!(kind = ?kind, listeners = removed, "listeners cleared");
        }
    }

    /// Number of listeners currently registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: P::Kind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the packet's kind, in
    /// registration order, on the calling thread.
    ///
    /// Dispatch to a kind with zero listeners is a no-op. Returns the number
    /// of successful deliveries.
    pub fn dispatch(&self, packet: &P) -> usize {
        let kind = packet.kind();
        self.metrics
            .packets_dispatched
            .fetch_add(1, Ordering::Relaxed);

        let snapshot: Vec<RegisteredListener<P>> = self
            .listeners
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            debug!(kind = ?kind, "packet dispatched, no listeners");
            return 0;
        }

        let mut delivered = 0;
        for entry in &snapshot {
            // A panicking listener must not take down the receive path or
            // the listeners after it in the snapshot.
            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(packet)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => self.report_failure(kind, entry.id, &error),
                Err(_) => self.report_failure(kind, entry.id, &ListenerError::Panicked),
            }
        }

        self.metrics
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Install a hook receiving every contained listener failure.
    ///
    /// Replaces any previously installed hook. Failures are logged whether
    /// or not a hook is installed.
    pub fn set_failure_hook<F>(&self, hook: F)
    where
        F: Fn(P::Kind, &ListenerError) + Send + Sync + 'static,
    {
        *self.failure_hook.write() = Some(Arc::new(hook));
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            packets_dispatched: self.metrics.packets_dispatched.load(Ordering::Relaxed),
            deliveries: self.metrics.deliveries.load(Ordering::Relaxed),
            listener_failures: self.metrics.listener_failures.load(Ordering::Relaxed),
        }
    }

    fn report_failure(&self, kind: P::Kind, id: ListenerId, error: &ListenerError) {
        self.metrics
            .listener_failures
            .fetch_add(1, Ordering::Relaxed);
        warn!(kind = ?kind, listener = ?id, error = %error, "listener failed during dispatch");

        let hook = self.failure_hook.read().clone();
        if let Some(hook) = hook {
            hook(kind, error);
        }
    }
}

impl<P: Packet> Default for ListenerRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes one registration from the registry when dropped.
///
/// Backs every ephemeral request listener and every subscription: teardown
/// happens on all exit paths, including error propagation and drop.
pub(crate) struct ListenerGuard<P: Packet> {
    registry: Arc<ListenerRegistry<P>>,
    kind: P::Kind,
    id: ListenerId,
}

impl<P: Packet> ListenerGuard<P> {
    pub(crate) fn new(registry: Arc<ListenerRegistry<P>>, kind: P::Kind, id: ListenerId) -> Self {
        Self { registry, kind, id }
    }
}

impl<P: Packet> Drop for ListenerGuard<P> {
    fn drop(&mut self) {
        self.registry.remove(self.kind, self.id);
    }
}
