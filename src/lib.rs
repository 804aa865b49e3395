//! Asynchronous TLS-over-TCP transport.
//!
//! Outbound: [`Connector::connect`] opens a socket, optionally binds a source
//! address, connects and runs the client handshake. Inbound: [`listen`] loads
//! credentials and binds, then [`TlsServer::run`] accepts, handshakes and
//! dispatches each connection to a [`ConnectionHandler`] until stopped.
//! Either way the caller gets a [`ChannelPair`] of encrypted byte streams.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod tls;

pub use config::{load_config, TransportConfig};
pub use error::{TlsError, TransportError};
pub use lifecycle::{StopListener, StopSignal};
pub use net::{connect, listen, ChannelPair, Connector, InputStream, ListenOptions, Listener, OutputStream};
pub use server::{handler_fn, process_accept, serve, ConnectionHandler, HandlerResult, ServeOptions, ServeReport, TlsServer};
pub use tls::{ClientContext, ServerContext, TlsVersion};
