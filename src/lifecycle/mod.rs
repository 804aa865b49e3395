//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → StopSignal::trigger
//!
//! Shutdown (shutdown.rs):
//!     StopSignal triggered → accept loop stops accepting
//!     → optional drain of dispatched connections → run() returns
//! ```
//!
//! # Design Decisions
//! - One StopSignal may stop any number of accept loops
//! - The listening socket is not closed by the loop; it goes with its owner

pub mod shutdown;
pub mod signals;

pub use shutdown::{StopListener, StopSignal};
