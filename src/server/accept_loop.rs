//! Server accept loop.
//!
//! # Responsibilities
//! - Accept connections one at a time until a stop is requested
//! - Spawn a dispatcher task per handshaken connection
//! - Keep running through per-connection failures
//! - Back off after listener-level accept errors
//! - Optionally drain dispatched connections after stopping
//!
//! # State Machine
//! ```text
//! Running ──stop flag set / stop during accept──▶ Stopped ──drain──▶ run() returns
//!    │ ▲
//!    │ └── accepted (spawn) | handshake failed | accept error (backoff)
//!    ▼
//! next accept
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::error::TransportError;
use crate::lifecycle::shutdown::StopListener;
use crate::net::channel::ChannelPair;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{listen, ListenOptions, Listener};
use crate::observability::metrics;
use crate::resilience::backoff::AcceptBackoff;
use crate::server::dispatcher::{process_accept, ConnectionHandler};

/// Counters describing one run of the accept loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    /// Connections that completed the handshake and were dispatched.
    pub accepted: u64,
    /// Connections lost before dispatch: failed or timed-out handshakes, and
    /// peers that aborted while still queued.
    pub handshake_failures: u64,
    /// Failures of the listening socket's own `accept`.
    pub accept_failures: u64,
}

/// Loop settings for [`serve`].
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Per-connection handler timeout. `None` lets handlers run forever.
    pub timeout: Option<Duration>,
    /// Stop request observer. `None` runs until the process exits.
    pub stop: Option<StopListener>,
    pub backoff: AcceptBackoff,
    /// How long a stopped loop waits for dispatched connections.
    pub drain_timeout: Option<Duration>,
}

/// Accept loop over one [`Listener`].
pub struct TlsServer<H> {
    listener: Listener,
    handler: Arc<H>,
    timeout: Option<Duration>,
    stop: Option<StopListener>,
    backoff: AcceptBackoff,
    drain_timeout: Option<Duration>,
    tracker: ConnectionTracker,
}

impl<H: ConnectionHandler> TlsServer<H> {
    pub fn new(listener: Listener, handler: H) -> Self {
        Self {
            listener,
            handler: Arc::new(handler),
            timeout: None,
            stop: None,
            backoff: AcceptBackoff::default(),
            drain_timeout: None,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Abandon and close each connection after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stop(mut self, stop: StopListener) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_backoff(mut self, backoff: AcceptBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Option<Duration>) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Tracker over this server's dispatched connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Run until stopped.
    ///
    /// Dispatched connections keep running after this returns unless a drain
    /// timeout was set and they finish within it. The listening socket is
    /// released when `self` is dropped.
    pub async fn run(mut self) -> ServeReport {
        let mut report = ServeReport::default();
        let address = self.listener.local_addr();

        tracing::info!(
            address = %address,
            timeout = ?self.timeout,
            "Accept loop running"
        );

        loop {
            if self.stop_requested() {
                break;
            }

            match self.next_connection().await {
                Ok(pair) => {
                    report.accepted += 1;
                    self.backoff.on_success();
                    metrics::record_accepted();
                    self.dispatch(pair);
                }
                Err(e) => match after_failed_accept(&e, &mut report, &mut self.backoff) {
                    AcceptStep::Stop => break,
                    AcceptStep::Continue => {}
                    AcceptStep::Pause(delay) => self.pause(delay).await,
                },
            }
        }

        tracing::info!(
            address = %address,
            accepted = report.accepted,
            in_flight = self.tracker.active_count(),
            "Accept loop stopped"
        );

        if let Some(limit) = self.drain_timeout {
            if self.tracker.drain(limit).await {
                tracing::info!("All connections drained");
            } else {
                tracing::warn!(
                    remaining = self.tracker.active_count(),
                    "Drain timeout reached with connections still open"
                );
            }
        }

        report
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(StopListener::is_stopped)
    }

    /// Accept the next connection, giving up with `Cancelled` on a stop.
    async fn next_connection(&mut self) -> Result<ChannelPair, TransportError> {
        let listener = &self.listener;
        match self.stop.as_mut() {
            None => listener.accept().await,
            Some(stop) => tokio::select! {
                biased;
                _ = stop.stopped() => Err(TransportError::Cancelled),
                result = listener.accept() => result,
            },
        }
    }

    /// Sleep after an accept error, waking early on a stop.
    async fn pause(&mut self, delay: Duration) {
        match self.stop.as_mut() {
            None => tokio::time::sleep(delay).await,
            Some(stop) => {
                tokio::select! {
                    _ = stop.stopped() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    fn dispatch(&self, pair: ChannelPair) {
        let guard = self.tracker.track();
        let handler = Arc::clone(&self.handler);
        let timeout = self.timeout;
        let span = tracing::info_span!("connection", connection_id = %guard.id(), peer = %pair.peer);

        tokio::spawn(
            async move {
                process_accept(pair, handler.as_ref(), timeout).await;
                // Untracked only once the pair is closed.
                drop(guard);
            }
            .instrument(span),
        );
    }
}

/// What the loop does next after `accept` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptStep {
    Stop,
    Continue,
    Pause(Duration),
}

/// Count a failed accept and decide how the loop carries on.
fn after_failed_accept(
    error: &TransportError,
    report: &mut ServeReport,
    backoff: &mut AcceptBackoff,
) -> AcceptStep {
    if error.is_cancelled() {
        return AcceptStep::Stop;
    }

    if error.is_connection_scoped() {
        report.handshake_failures += 1;
        tracing::debug!(error = %error, "Dropped connection before dispatch");
        return AcceptStep::Continue;
    }

    report.accept_failures += 1;
    metrics::record_accept_failure();
    let delay = backoff.on_failure();
    tracing::warn!(
        error = %error,
        consecutive = backoff.consecutive_failures(),
        delay_ms = delay.as_millis() as u64,
        "Accept failed, backing off"
    );
    AcceptStep::Pause(delay)
}

/// Bind a listener from `options` and run an accept loop on it.
///
/// Fails only if the listener cannot be set up; once running, the loop
/// returns its report after a stop.
pub async fn serve<H: ConnectionHandler>(
    options: ListenOptions,
    handler: H,
    serve_options: ServeOptions,
) -> Result<ServeReport, TransportError> {
    let listener = listen(options).await?;
    let ServeOptions {
        timeout,
        stop,
        backoff,
        drain_timeout,
    } = serve_options;

    let mut server = TlsServer::new(listener, handler)
        .with_timeout(timeout)
        .with_backoff(backoff)
        .with_drain_timeout(drain_timeout);
    if let Some(stop) = stop {
        server = server.with_stop(stop);
    }

    Ok(server.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn backoff() -> AcceptBackoff {
        AcceptBackoff::new(Duration::from_millis(10), Duration::from_secs(1))
    }

    #[test]
    fn listener_errors_back_off_harder_each_time() {
        let mut report = ServeReport::default();
        let mut backoff = backoff();
        // EMFILE
        let exhausted = TransportError::Accept(io::Error::from_raw_os_error(24));

        let mut delays = Vec::new();
        for _ in 0..3 {
            match after_failed_accept(&exhausted, &mut report, &mut backoff) {
                AcceptStep::Pause(delay) => delays.push(delay),
                step => panic!("expected a pause, got {step:?}"),
            }
        }

        assert_eq!(report.accept_failures, 3);
        assert_eq!(report.handshake_failures, 0);
        assert_eq!(backoff.consecutive_failures(), 3);
        assert!(delays[0] >= Duration::from_millis(10), "{delays:?}");
        assert!(delays.windows(2).all(|w| w[1] > w[0]), "{delays:?}");
    }

    #[test]
    fn lost_connections_do_not_pause_the_loop() {
        let mut report = ServeReport::default();
        let mut backoff = backoff();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let failures = [
            TransportError::Handshake {
                peer,
                source: io::Error::from(io::ErrorKind::InvalidData),
            },
            TransportError::TimedOut {
                stage: "handshake",
                peer,
                after: Duration::from_secs(1),
            },
            TransportError::Accept(io::Error::from(io::ErrorKind::ConnectionAborted)),
            TransportError::Accept(io::Error::from(io::ErrorKind::ConnectionReset)),
        ];
        for error in &failures {
            assert_eq!(
                after_failed_accept(error, &mut report, &mut backoff),
                AcceptStep::Continue,
                "{error}"
            );
        }

        assert_eq!(report.handshake_failures, 4);
        assert_eq!(report.accept_failures, 0);
        assert_eq!(backoff.consecutive_failures(), 0);
    }

    #[test]
    fn cancellation_stops_without_counting() {
        let mut report = ServeReport::default();
        let mut backoff = backoff();

        let step = after_failed_accept(&TransportError::Cancelled, &mut report, &mut backoff);

        assert_eq!(step, AcceptStep::Stop);
        assert_eq!(report, ServeReport::default());
    }
}
