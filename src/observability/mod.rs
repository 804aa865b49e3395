//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net/ and server/ produce:
//!     → tracing events (connection_id, peer, error fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, EnvFilter)
//!     → Prometheus scrape (optional)
//! ```

pub mod logging;
pub mod metrics;
