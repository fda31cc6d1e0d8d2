//! # packet-link - Correlation Layer for Packet Transports
//!
//! Transport-agnostic listener registry and request/response correlation:
//! given a raw transmit/receive primitive over some medium, callers can
//! register persistent listeners that fire whenever a packet of a given
//! kind arrives, and issue request/response operations that transmit a
//! packet and resolve (or fail) within a bounded time window.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  transmit()   ┌──────────────┐
//! │  PacketLink  │ ────────────▶ │  Transport   │
//! │              │               │   (medium)   │
//! │  registry    │ ◀──────────── │              │
//! │  coordinator │  dispatch()   └──────────────┘
//! └──────┬───────┘   via PacketDispatcher
//!        │ fan-out, registration order
//!        ▼
//!  persistent listeners · subscriptions · ephemeral request listeners
//! ```
//!
//! ## Guarantees
//!
//! - Every request resolves exactly once: success, timeout, cancel, or
//!   transmit failure, whichever happens first.
//! - The ephemeral listener behind a request is removed from the registry
//!   on every exit path.
//! - A failing listener never disturbs the remaining listeners, the
//!   receive path, or unrelated requests.
//!
//! Delivery and ordering on the wire remain the transport's problem;
//! nothing here survives a process restart.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

use std::time::Duration;

pub mod error;
pub mod link;
pub mod packet;
pub mod registry;
pub mod request;
pub mod subscription;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export main types
pub use error::{ListenerError, RequestError, SubscriptionClosed, TransmitError};
pub use link::PacketLink;
pub use packet::Packet;
pub use registry::{ListenerId, ListenerRegistry, RegistryStats};
pub use request::{RequestCoordinator, RequestStats, RequestWindow, ResponseStream};
pub use subscription::{PacketStream, Subscription};
pub use transport::{PacketDispatcher, Transport};

/// Deadline applied by `RequestWindow::default()`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
