//! TLS server: accept loop and per-connection dispatch.
//!
//! # Data Flow
//! ```text
//! Listener::accept (handshake done)
//!     → accept_loop.rs (spawn, track)
//!     → dispatcher.rs (handler raced against timeout, panics caught)
//!     → ChannelPair::close
//! ```

pub mod accept_loop;
pub mod dispatcher;

pub use accept_loop::{serve, ServeOptions, ServeReport, TlsServer};
pub use dispatcher::{
    handler_fn, process_accept, ConnectionHandler, DispatchOutcome, HandlerFn, HandlerResult,
};
