//! # Request/Response Correlation
//!
//! One ephemeral listener per in-flight request, a deadline on the shared
//! tokio timer wheel, and exactly-once resolution from whichever of
//! {matching packet, deadline, cancel} happens first.
//!
//! ## Lifecycle
//!
//! ```text
//! begin()                      ResponseStream
//!   │ sleep(listening_delay)       │
//!   │ install ephemeral listener   │◀── dispatch(packet) forwards matches
//!   │ arm deadline                 │
//!   │ transmit(request) ───────────│──▶ medium
//!   └─▶ ResponseStream             │
//!                                  ├─ Ok(packet)  per match, until is_over
//!                                  ├─ Err(TimedOut | Cancelled)  terminal
//!                                  └─ teardown: listener removed, always
//! ```
//!
//! The listener and deadline are armed before the request is transmitted, so
//! a response cannot race past a missing listener. Teardown rides a drop
//! guard: every exit path (completion, timeout, cancel, transmit failure,
//! plain drop) removes the ephemeral listener from the registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, Sleep};
use tokio_stream::Stream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RequestError, TransmitError};
use crate::packet::Packet;
use crate::registry::{ListenerGuard, ListenerRegistry};
use crate::transport::Transport;
use crate::DEFAULT_REQUEST_TIMEOUT;

/// Time window of one request.
///
/// The deadline is measured from the instant the request begins, regardless
/// of `listening_delay`: a delay narrows the effective listening window, it
/// never extends the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestWindow {
    /// Time until the request fails with `TimedOut`. `None` arms no
    /// deadline; the caller accepts the risk of an uncollectable listener
    /// if no matching packet ever arrives.
    pub timeout: Option<Duration>,

    /// Time to wait before installing the ephemeral listener. Packets of
    /// the response kind delivered during the delay are not observed by
    /// this request.
    pub listening_delay: Duration,
}

impl RequestWindow {
    /// Window with the given deadline and no listening delay.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            listening_delay: Duration::ZERO,
        }
    }

    /// Window with no deadline.
    #[must_use]
    pub fn never() -> Self {
        Self {
            timeout: None,
            listening_delay: Duration::ZERO,
        }
    }

    /// Defer listening by `delay`.
    #[must_use]
    pub fn listening_delay(mut self, delay: Duration) -> Self {
        self.listening_delay = delay;
        self
    }
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            listening_delay: Duration::ZERO,
        }
    }
}

/// Counters for request activity.
#[derive(Debug, Default)]
pub(crate) struct RequestMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    transmit_failures: AtomicU64,
}

/// Point-in-time snapshot of [`RequestCoordinator`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    /// Requests begun (listener installed).
    pub started: u64,
    /// Requests that completed successfully.
    pub completed: u64,
    /// Requests that failed on their deadline.
    pub timed_out: u64,
    /// Requests cancelled or torn down before resolving.
    pub cancelled: u64,
    /// Requests aborted because the transport failed to transmit.
    pub transmit_failures: u64,
}

/// Creates and arms pending requests against a shared registry.
pub struct RequestCoordinator<P: Packet> {
    registry: Arc<ListenerRegistry<P>>,
    metrics: Arc<RequestMetrics>,
}

impl<P: Packet> RequestCoordinator<P> {
    /// Coordinator installing ephemeral listeners into `registry`.
    #[must_use]
    pub fn new(registry: Arc<ListenerRegistry<P>>) -> Self {
        Self {
            registry,
            metrics: Arc::new(RequestMetrics::default()),
        }
    }

    /// Begin a correlated request: install an ephemeral listener for
    /// `response_kind`, arm the deadline, transmit `request`, and return the
    /// stream of matching responses.
    ///
    /// `is_over` is evaluated after each delivered packet; when it returns
    /// true the stream completes and tears down immediately. A transmit
    /// failure removes the already-installed listener before the error
    /// propagates.
    pub async fn begin<T, F>(
        &self,
        transport: &T,
        response_kind: P::Kind,
        request: P,
        window: RequestWindow,
        is_over: F,
    ) -> Result<ResponseStream<P>, TransmitError>
    where
        T: Transport<P> + ?Sized,
        F: FnMut(&P) -> bool + Send + 'static,
    {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        self.metrics.started.fetch_add(1, Ordering::Relaxed);
        debug!(
            %request_id,
            response_kind = ?response_kind,
            timeout = ?window.timeout,
            listening_delay = ?window.listening_delay,
            "request started"
        );

        if let Some(timeout) = window.timeout {
            if window.listening_delay >= timeout {
                warn!(%request_id, "listening delay consumes the entire timeout window");
            }
        }

        if !window.listening_delay.is_zero() {
            tokio::time::sleep(window.listening_delay).await;
        }

        let (forward, rx) = mpsc::unbounded_channel();
        let id = self.registry.add(response_kind, move |packet: &P| {
            // Runs on the receive path: hand off and return, nothing else.
            let _ = forward.send(packet.clone());
            Ok(())
        });
        let guard = ListenerGuard::new(Arc::clone(&self.registry), response_kind, id);

        let deadline = window
            .timeout
            .map(|timeout| Box::pin(sleep_until(started + timeout)));

        if let Err(error) = transport.transmit(request.clone()).await {
            warn!(%request_id, error = %error, "transmit failed, request aborted");
            self.metrics.transmit_failures.fetch_add(1, Ordering::Relaxed);
            drop(guard);
            return Err(error);
        }

        Ok(ResponseStream {
            request_id,
            request,
            rx,
            deadline,
            is_over: Box::new(is_over),
            guard: Some(guard),
            metrics: Arc::clone(&self.metrics),
            phase: Phase::Listening,
        })
    }

    /// Snapshot of the request counters.
    #[must_use]
    pub fn stats(&self) -> RequestStats {
        RequestStats {
            started: self.metrics.started.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            timed_out: self.metrics.timed_out.load(Ordering::Relaxed),
            cancelled: self.metrics.cancelled.load(Ordering::Relaxed),
            transmit_failures: self.metrics.transmit_failures.load(Ordering::Relaxed),
        }
    }
}

enum Phase<P> {
    /// Listener installed, waiting on packets and the deadline.
    Listening,
    /// Terminal error decided, not yet handed to the caller.
    Failing(RequestError<P>),
    /// Resolved; the stream only returns `None` from here on.
    Terminal,
}

/// Responses to one in-flight request.
///
/// Yields `Ok(packet)` for every matching packet until the completion
/// predicate returns true, then ends. Yields at most one terminal
/// `Err(TimedOut | Cancelled)`. Dropping the stream cancels the request;
/// either way the ephemeral listener is removed from the registry at the
/// moment of resolution.
pub struct ResponseStream<P: Packet> {
    request_id: Uuid,
    request: P,
    rx: mpsc::UnboundedReceiver<P>,
    deadline: Option<Pin<Box<Sleep>>>,
    is_over: Box<dyn FnMut(&P) -> bool + Send>,
    guard: Option<ListenerGuard<P>>,
    metrics: Arc<RequestMetrics>,
    phase: Phase<P>,
}

impl<P: Packet> ResponseStream<P> {
    /// Correlation id carried through this request's tracing events.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Cancel the request.
    ///
    /// First resolver wins: cancelling an already-resolved request is a
    /// no-op. Otherwise the listener is removed immediately and the next
    /// poll yields `Err(RequestError::Cancelled)`.
    pub fn cancel(&mut self) {
        if matches!(self.phase, Phase::Listening) {
            self.teardown();
            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %self.request_id, "request cancelled");
            self.phase = Phase::Failing(RequestError::Cancelled);
        }
    }

    fn teardown(&mut self) {
        self.guard.take();
        self.rx.close();
    }
}

// Nothing in the stream is structurally pinned; the deadline is boxed.
impl<P: Packet> Unpin for ResponseStream<P> {}

impl<P: Packet> Stream for ResponseStream<P> {
    type Item = Result<P, RequestError<P>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match this.phase {
            Phase::Terminal => return Poll::Ready(None),
            Phase::Failing(_) => {
                let Phase::Failing(error) = std::mem::replace(&mut this.phase, Phase::Terminal)
                else {
                    return Poll::Ready(None);
                };
                return Poll::Ready(Some(Err(error)));
            }
            Phase::Listening => {}
        }

        // A packet and the deadline racing into the same poll resolve in the
        // packet's favor.
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(packet)) => {
                if (this.is_over)(&packet) {
                    this.teardown();
                    this.metrics.completed.fetch_add(1, Ordering::Relaxed);
                    this.phase = Phase::Terminal;
                    debug!(request_id = %this.request_id, "request completed");
                }
                return Poll::Ready(Some(Ok(packet)));
            }
            Poll::Ready(None) => {
                // Listener torn down behind our back (e.g. clear on the
                // response kind); nothing further can arrive.
                this.teardown();
                this.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                this.phase = Phase::Terminal;
                debug!(request_id = %this.request_id, "request listener externally removed");
                return Poll::Ready(Some(Err(RequestError::Cancelled)));
            }
            Poll::Pending => {}
        }

        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                this.teardown();
                this.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
                this.phase = Phase::Terminal;
                warn!(request_id = %this.request_id, "request timed out");
                return Poll::Ready(Some(Err(RequestError::TimedOut {
                    request: this.request.clone(),
                })));
            }
        }

        Poll::Pending
    }
}

impl<P: Packet> Drop for ResponseStream<P> {
    fn drop(&mut self) {
        if matches!(self.phase, Phase::Listening) {
            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %self.request_id, "request dropped while in flight");
        }
    }
}
