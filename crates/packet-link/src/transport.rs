//! # Transport Capability
//!
//! The outbound port of the link, plus the narrow inbound capability handed
//! to the transport's receive loop.
//!
//! The link never owns the medium. Outbound, it calls [`Transport::transmit`]
//! and nothing else. Inbound, the embedding application decodes packets off
//! the medium and pushes them through a [`PacketDispatcher`] obtained at
//! construction time; the registry is never reached through a late-bound
//! field on the transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransmitError;
use crate::packet::Packet;
use crate::registry::ListenerRegistry;

/// Capability to transmit one packet to the medium.
#[async_trait]
pub trait Transport<P: Packet>: Send + Sync {
    /// Transmit `packet`.
    ///
    /// Resolves only once the packet is durably handed to the medium. A
    /// failure propagates verbatim to whichever request initiated the
    /// transmission; the link performs no retry. Implementations wrapping
    /// genuinely blocking I/O should do so behind `spawn_blocking`.
    async fn transmit(&self, packet: P) -> Result<(), TransmitError>;
}

/// Clonable inbound capability: push decoded packets into the link.
///
/// This is the only entry point the receive path needs; it exposes dispatch
/// and nothing else.
pub struct PacketDispatcher<P: Packet> {
    registry: Arc<ListenerRegistry<P>>,
}

impl<P: Packet> PacketDispatcher<P> {
    pub(crate) fn new(registry: Arc<ListenerRegistry<P>>) -> Self {
        Self { registry }
    }

    /// Fan `packet` out to every listener registered for its kind.
    ///
    /// Synchronous, on the calling thread. Returns the number of successful
    /// deliveries; zero listeners is a no-op, not an error.
    pub fn dispatch(&self, packet: &P) -> usize {
        self.registry.dispatch(packet)
    }
}

impl<P: Packet> Clone for PacketDispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}
