//! Error taxonomy for the transport.
//!
//! # Classes
//! - Acquisition: `Socket`, `Bind`, `Listen`, `Connect` (socket already released)
//! - Handshake: `Handshake` (raw stream already closed)
//! - Loop control: `Cancelled` terminates an accept loop, nothing else does
//! - Credentials: `Tls` (certificate / key material, rustls configuration)
//!
//! Close failures never show up here; they are swallowed at the release site.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by `connect`, `listen` and `accept`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The OS refused to create a socket for this address family.
    #[error("failed to open socket for {addr}: {source}")]
    Socket { addr: SocketAddr, source: io::Error },

    /// Binding a local address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// Marking the socket as listening (or registering it) failed.
    #[error("failed to listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },

    /// TCP connect to the destination failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    /// The `accept` call on the listening socket failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// TLS handshake failed (either role).
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake { peer: SocketAddr, source: io::Error },

    /// A bounded step (connect or handshake) ran out of time.
    #[error("{stage} with {peer} timed out after {after:?}")]
    TimedOut {
        stage: &'static str,
        peer: SocketAddr,
        after: Duration,
    },

    /// Certificate, key or TLS configuration problem.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The operation was cancelled by a stop request.
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// True for the loop-terminating class.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    /// True when the failure concerns one connection only and the listener
    /// itself is still healthy.
    ///
    /// `accept` reports a peer that reset or aborted while still queued with
    /// these kinds; they say nothing about the listening socket.
    pub fn is_connection_scoped(&self) -> bool {
        match self {
            TransportError::Handshake { .. } | TransportError::TimedOut { .. } => true,
            TransportError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

/// Errors building a TLS context or loading credentials.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    /// The key is encrypted but no passphrase callback was installed.
    #[error("private key {0:?} is encrypted and no passphrase callback is set")]
    PassphraseRequired(PathBuf),

    /// Wrong passphrase or unsupported encryption scheme.
    #[error("failed to decrypt private key {path:?}: {reason}")]
    Decrypt { path: PathBuf, reason: String },

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// `accept` on a server context whose certificate was never loaded.
    #[error("server context has no certificate loaded")]
    MissingCredentials,

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}
