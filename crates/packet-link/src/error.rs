//! # Error Types
//!
//! Defines the error taxonomy of the link.
//!
//! Errors intrinsic to one request (`RequestError`) surface only on that
//! request's result channel. Errors local to one listener invocation
//! (`ListenerError`) are contained at the dispatch boundary. There is no
//! global error channel.

use std::error::Error as StdError;
use thiserror::Error;

/// Errors that terminate an in-flight request.
#[derive(Debug, Error)]
pub enum RequestError<P> {
    /// No satisfying response arrived before the deadline.
    /// Carries the original request packet for diagnostics.
    #[error("request timed out waiting for a matching response")]
    TimedOut {
        /// The packet that was transmitted for this request.
        request: P,
    },

    /// The transport failed to transmit the request packet.
    #[error("transmit failed: {0}")]
    Transmit(#[from] TransmitError),

    /// The request was cancelled before resolving.
    #[error("request cancelled")]
    Cancelled,
}

impl<P> RequestError<P> {
    /// Whether this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Failure surfaced verbatim from a transport's `transmit`.
///
/// The link performs no retry; the error propagates to whichever request
/// initiated the transmission.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransmitError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl TransmitError {
    /// Create a transmit error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transmit error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A registered listener callback failed.
///
/// Isolated per listener: reported through the registry's observability
/// hook, never propagated to the transport's receive path nor to the
/// remaining listeners for the packet.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener returned an error.
    #[error("listener failed: {0}")]
    Failed(String),

    /// The listener panicked during dispatch.
    #[error("listener panicked")]
    Panicked,
}

/// The subscription's channel was closed (registry side torn down).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("subscription closed")]
pub struct SubscriptionClosed;
