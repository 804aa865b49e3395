//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatched connection:
//!     → timeouts.rs (handler raced against the per-connection timer)
//!
//! Accept loop:
//!     → listener-level accept error
//!     → backoff.rs (pause with exponential backoff + jitter, reset on success)
//! ```
//!
//! # Design Decisions
//! - Timeouts are outcomes, not errors
//! - Only listener-level failures back off; a bad handshake costs nothing

pub mod backoff;
pub mod timeouts;
