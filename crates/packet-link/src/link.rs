//! # Link Facade
//!
//! Composes a transport capability with the listener registry and the
//! request coordinator, and exposes the public operations: fire-and-forget
//! send, persistent subscribe, single-response request, ack request, and
//! multi-response streaming request.
//!
//! The facade holds no state of its own beyond what the registry and the
//! coordinator already hold.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::{ListenerError, RequestError, TransmitError};
use crate::packet::Packet;
use crate::registry::{ListenerGuard, ListenerId, ListenerRegistry, RegistryStats};
use crate::request::{RequestCoordinator, RequestStats, RequestWindow, ResponseStream};
use crate::subscription::Subscription;
use crate::transport::{PacketDispatcher, Transport};

/// Correlation layer over one packet transport.
///
/// Owns the [`ListenerRegistry`] and the [`RequestCoordinator`]; the
/// transport only ever sees the narrow [`PacketDispatcher`] capability for
/// its inbound path.
///
/// ## Thread Safety
///
/// The link is thread-safe and is shared across tasks via `Arc`. The
/// transport's receive path may dispatch concurrently with callers adding
/// listeners and issuing requests.
pub struct PacketLink<P: Packet, T: Transport<P>> {
    registry: Arc<ListenerRegistry<P>>,
    transport: Arc<T>,
    coordinator: RequestCoordinator<P>,
}

impl<P: Packet, T: Transport<P>> PacketLink<P, T> {
    /// Create a link over `transport`.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        Self {
            coordinator: RequestCoordinator::new(registry.clone()),
            registry,
            transport,
        }
    }

    /// Transmit `packet` without waiting for any response.
    pub async fn send(&self, packet: P) -> Result<(), TransmitError> {
        debug!(kind = ?packet.kind(), "sending packet");
        self.transport.transmit(packet).await
    }

    /// Register a persistent listener for `kind`.
    ///
    /// The listener runs synchronously on the receive path for every
    /// dispatched packet of the kind, until removed.
    pub fn add_listener<F>(&self, kind: P::Kind, listener: F) -> ListenerId
    where
        F: Fn(&P) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.registry.add(kind, listener)
    }

    /// Remove the listener registered under `id`. Idempotent.
    pub fn remove_listener(&self, kind: P::Kind, id: ListenerId) -> bool {
        self.registry.remove(kind, id)
    }

    /// Remove all listeners for `kind`.
    pub fn clear_listeners(&self, kind: P::Kind) {
        self.registry.clear(kind);
    }

    /// Number of listeners currently registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: P::Kind) -> usize {
        self.registry.listener_count(kind)
    }

    /// Subscribe to packets of `kind` through a channel-backed handle.
    ///
    /// The subscription's listener is removed when the handle is dropped.
    #[must_use]
    pub fn subscribe(&self, kind: P::Kind) -> Subscription<P> {
        let (forward, rx) = tokio::sync::mpsc::unbounded_channel();
        let id = self.registry.add(kind, move |packet: &P| {
            // Runs on the receive path: hand off and return, nothing else.
            let _ = forward.send(packet.clone());
            Ok(())
        });
        debug!(kind = ?kind, listener = ?id, "subscription created");
        Subscription::new(kind, rx, ListenerGuard::new(self.registry.clone(), kind, id))
    }

    /// Transmit `request` and wait for the first packet of `response_kind`.
    ///
    /// `timeout` of `None` waits indefinitely.
    pub async fn request(
        &self,
        response_kind: P::Kind,
        request: P,
        timeout: Option<Duration>,
    ) -> Result<P, RequestError<P>> {
        let window = RequestWindow {
            timeout,
            listening_delay: Duration::ZERO,
        };
        let mut responses = self
            .coordinator
            .begin(
                self.transport.as_ref(),
                response_kind,
                request,
                window,
                |_packet| true,
            )
            .await?;
        match responses.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(error)) => Err(error),
            None => Err(RequestError::Cancelled),
        }
    }

    /// Transmit `request`, wait for one packet of `response_kind`, and
    /// discard it.
    pub async fn request_ack(
        &self,
        response_kind: P::Kind,
        request: P,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError<P>> {
        self.request(response_kind, request, timeout).await.map(|_| ())
    }

    /// Transmit `request` and stream every packet of `response_kind` until
    /// `is_over` returns true or the window closes.
    pub async fn request_stream<F>(
        &self,
        response_kind: P::Kind,
        request: P,
        window: RequestWindow,
        is_over: F,
    ) -> Result<ResponseStream<P>, TransmitError>
    where
        F: FnMut(&P) -> bool + Send + 'static,
    {
        self.coordinator
            .begin(self.transport.as_ref(), response_kind, request, window, is_over)
            .await
    }

    /// Fan an inbound packet out to its listeners.
    ///
    /// Equivalent to [`PacketDispatcher::dispatch`]; the dispatcher form is
    /// what the transport's receive loop should hold.
    pub fn dispatch(&self, packet: &P) -> usize {
        self.registry.dispatch(packet)
    }

    /// The inbound capability for the transport's receive loop.
    #[must_use]
    pub fn dispatcher(&self) -> PacketDispatcher<P> {
        PacketDispatcher::new(self.registry.clone())
    }

    /// Install a hook receiving every contained listener failure.
    pub fn set_failure_hook<F>(&self, hook: F)
    where
        F: Fn(P::Kind, &ListenerError) + Send + Sync + 'static,
    {
        self.registry.set_failure_hook(hook);
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Snapshot of the request counters.
    #[must_use]
    pub fn request_stats(&self) -> RequestStats {
        self.coordinator.stats()
    }
}
