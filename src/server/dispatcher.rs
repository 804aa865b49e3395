//! Per-connection dispatch.
//!
//! # Responsibilities
//! - Hand the streams of an accepted pair to the application handler
//! - Bound the handler with the per-connection timeout
//! - Contain handler errors and panics
//! - Close the pair on every exit path
//!
//! # Design Decisions
//! - The handler borrows the streams. The pair is reassembled and closed here,
//!   after the race, so neither a timeout nor a panic can skip the close.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::net::channel::{ChannelPair, CloseStream, InputStream, OutputStream};
use crate::observability::metrics;
use crate::resilience::timeouts::{race, Raced};

/// What a handler reports back. Errors are logged and go no further.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Application code run once per accepted connection.
pub trait ConnectionHandler<I = InputStream, O = OutputStream>: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        peer: SocketAddr,
        input: &'a mut I,
        output: &'a mut O,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Handler backed by a closure. See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Build a handler from a closure returning a boxed future.
///
/// ```ignore
/// let echo = handler_fn(|_peer, input, output| {
///     Box::pin(async move {
///         tokio::io::copy(input, output).await?;
///         Ok(())
///     })
/// });
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(SocketAddr, &'a mut InputStream, &'a mut OutputStream) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    HandlerFn { f }
}

impl<F> ConnectionHandler for HandlerFn<F>
where
    F: for<'a> Fn(SocketAddr, &'a mut InputStream, &'a mut OutputStream) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        peer: SocketAddr,
        input: &'a mut InputStream,
        output: &'a mut OutputStream,
    ) -> BoxFuture<'a, HandlerResult> {
        (self.f)(peer, input, output)
    }
}

/// How a dispatched connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed(String),
    Panicked,
    TimedOut,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::Failed(_) => "failed",
            DispatchOutcome::Panicked => "panicked",
            DispatchOutcome::TimedOut => "timed_out",
        }
    }
}

/// Run `handler` on one pair, then close the pair.
///
/// With a `timeout`, the handler is abandoned once it elapses and the pair is
/// closed at that point. Never fails.
pub async fn process_accept<H, I, O>(
    pair: ChannelPair<I, O>,
    handler: &H,
    timeout: Option<Duration>,
) -> DispatchOutcome
where
    H: ConnectionHandler<I, O> + ?Sized,
    I: CloseStream,
    O: CloseStream,
{
    let started = Instant::now();
    let (peer, mut input, mut output) = pair.into_parts();

    let outcome = {
        let work = run_handler(handler, peer, &mut input, &mut output);
        match race(work, timeout).await {
            Raced::Completed(Ok(Ok(()))) => DispatchOutcome::Completed,
            Raced::Completed(Ok(Err(e))) => DispatchOutcome::Failed(e.to_string()),
            Raced::Completed(Err(_)) => DispatchOutcome::Panicked,
            Raced::TimedOut => DispatchOutcome::TimedOut,
        }
    };

    match &outcome {
        DispatchOutcome::Completed => {
            tracing::debug!(peer = %peer, "Handler completed");
        }
        DispatchOutcome::Failed(reason) => {
            tracing::debug!(peer = %peer, error = %reason, "Handler failed");
        }
        DispatchOutcome::Panicked => {
            tracing::warn!(peer = %peer, "Handler panicked");
        }
        DispatchOutcome::TimedOut => {
            tracing::debug!(peer = %peer, timeout = ?timeout, "Handler timed out");
        }
    }

    ChannelPair::from_parts(peer, input, output).close().await;
    metrics::record_dispatch(outcome.as_str(), started);
    outcome
}

/// The handler call happens inside the future so a panic while building it
/// is caught as well.
fn run_handler<'a, H, I, O>(
    handler: &'a H,
    peer: SocketAddr,
    input: &'a mut I,
    output: &'a mut O,
) -> impl Future<Output = std::thread::Result<HandlerResult>> + Send + 'a
where
    H: ConnectionHandler<I, O> + ?Sized,
    I: CloseStream,
    O: CloseStream,
{
    AssertUnwindSafe(async move { handler.handle(peer, input, output).await }).catch_unwind()
}
