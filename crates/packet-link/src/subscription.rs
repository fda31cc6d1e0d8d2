//! # Persistent Subscriptions
//!
//! Channel-backed receive side for callers that want to consume packets of
//! one kind as a stream rather than registering a callback.
//!
//! A subscription owns a forwarding listener in the registry. When dropped,
//! the listener is removed automatically.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::error::SubscriptionClosed;
use crate::packet::Packet;
use crate::registry::ListenerGuard;

/// A subscription handle for receiving packets of one kind.
///
/// When dropped, the underlying listener is removed from the registry.
pub struct Subscription<P: Packet> {
    kind: P::Kind,
    rx: mpsc::UnboundedReceiver<P>,
    _guard: ListenerGuard<P>,
}

impl<P: Packet> Subscription<P> {
    pub(crate) fn new(
        kind: P::Kind,
        rx: mpsc::UnboundedReceiver<P>,
        guard: ListenerGuard<P>,
    ) -> Self {
        Self {
            kind,
            rx,
            _guard: guard,
        }
    }

    /// Receive the next packet of the subscribed kind.
    ///
    /// Returns `None` once the registry side has been torn down (e.g. the
    /// kind was cleared) and all buffered packets were drained.
    pub async fn recv(&mut self) -> Option<P> {
        self.rx.recv().await
    }

    /// Receive the next packet without waiting.
    ///
    /// - `Ok(Some(packet))` - a packet was buffered
    /// - `Ok(None)` - nothing buffered right now
    /// - `Err(SubscriptionClosed)` - the registry side was torn down
    pub fn try_recv(&mut self) -> Result<Option<P>, SubscriptionClosed> {
        match self.rx.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SubscriptionClosed),
        }
    }

    /// The packet kind this subscription receives.
    #[must_use]
    pub fn kind(&self) -> P::Kind {
        self.kind
    }

    /// Convert into a [`Stream`] of packets.
    #[must_use]
    pub fn into_stream(self) -> PacketStream<P> {
        PacketStream { subscription: self }
    }
}

/// A stream wrapper for subscriptions, for use with stream combinators.
pub struct PacketStream<P: Packet> {
    subscription: Subscription<P>,
}

impl<P: Packet> PacketStream<P> {
    /// The packet kind this stream receives.
    #[must_use]
    pub fn kind(&self) -> P::Kind {
        self.subscription.kind()
    }
}

// Nothing in the stream is structurally pinned.
impl<P: Packet> Unpin for PacketStream<P> {}

impl<P: Packet> Stream for PacketStream<P> {
    type Item = P;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.subscription.rx.poll_recv(cx)
    }
}
