//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tls_connects_total` (counter): outbound connects by outcome
//! - `tls_accepted_total` (counter): handshaken inbound connections
//! - `tls_handshake_failures_total` (counter): failed handshakes by role
//! - `tls_accept_failures_total` (counter): listener-level accept errors
//! - `tls_dispatch_total` (counter): dispatched connections by outcome
//! - `tls_connection_duration_seconds` (histogram): dispatch to close
//! - `tls_active_connections` (gauge): dispatched, not yet closed
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter on `addr`. Needs a running Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connect(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("tls_connects_total", "outcome" => outcome).increment(1);
}

pub fn record_accepted() {
    counter!("tls_accepted_total").increment(1);
}

pub fn record_handshake_failure(role: &'static str) {
    counter!("tls_handshake_failures_total", "role" => role).increment(1);
}

pub fn record_accept_failure() {
    counter!("tls_accept_failures_total").increment(1);
}

/// Record how a dispatched connection ended and how long it lived.
pub fn record_dispatch(outcome: &'static str, started: Instant) {
    counter!("tls_dispatch_total", "outcome" => outcome).increment(1);
    histogram!("tls_connection_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    gauge!("tls_active_connections").set(count as f64);
}
