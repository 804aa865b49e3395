//! TLS listener and per-connection acceptor.
//!
//! # Responsibilities
//! - Load server credentials and bind a listening socket (reuse-address,
//!   backlog, close-on-exec)
//! - Accept one connection at a time and run the server handshake
//! - Close the raw stream whenever the handshake does not complete
//!
//! # Design Decisions
//! - Credentials load before the socket exists, so bad key material never
//!   leaves a bound port behind
//! - `accept` never returns an un-handshaken socket

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::error::TransportError;
use crate::net::channel::ChannelPair;
use crate::net::guard::SocketGuard;
use crate::observability::metrics;
use crate::tls::{PassphraseCallback, ServerContext};

/// Listen backlog used when none is given.
pub const DEFAULT_BACKLOG: u32 = 20;

/// Everything `listen` needs.
#[derive(Clone)]
pub struct ListenOptions {
    pub address: SocketAddr,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub passphrase: Option<PassphraseCallback>,
    pub backlog: u32,
    pub context: Option<ServerContext>,
    pub handshake_timeout: Option<Duration>,
}

impl ListenOptions {
    pub fn new(address: SocketAddr, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            address,
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            passphrase: None,
            backlog: DEFAULT_BACKLOG,
            context: None,
            handshake_timeout: None,
        }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_passphrase(mut self, callback: PassphraseCallback) -> Self {
        self.passphrase = Some(callback);
        self
    }

    /// Use `context` instead of a fresh default server context.
    pub fn with_context(mut self, context: ServerContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenOptions")
            .field("address", &self.address)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("passphrase", &self.passphrase.is_some())
            .field("backlog", &self.backlog)
            .field("context", &self.context)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Load credentials and bind a listening socket. Does not accept.
pub async fn listen(options: ListenOptions) -> Result<Listener, TransportError> {
    let ListenOptions {
        address,
        cert_file,
        key_file,
        passphrase,
        backlog,
        context,
        handshake_timeout,
    } = options;

    let mut context = context.unwrap_or_default();
    if let Some(callback) = passphrase {
        context.set_passphrase_callback(callback);
    }
    context.load_cert_chain(&cert_file, &key_file).await?;
    let acceptor = context.acceptor()?;

    let inner = bind_listener(address, backlog)?;
    let local_addr = inner
        .local_addr()
        .map_err(|source| TransportError::Listen { addr: address, source })?;

    tracing::info!(
        address = %local_addr,
        backlog,
        version = %context.version(),
        "Listener bound"
    );

    Ok(Listener {
        inner,
        acceptor,
        context,
        local_addr,
        handshake_timeout,
    })
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, TransportError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| TransportError::Socket { addr, source })?;
    let guard = SocketGuard::new(socket);
    let listen_error = |source: std::io::Error| TransportError::Listen { addr, source };

    let socket = guard.get();
    socket.set_nonblocking(true).map_err(listen_error)?;
    socket.set_reuse_address(true).map_err(listen_error)?;
    socket
        .bind(&addr.into())
        .map_err(|source| TransportError::Bind { addr, source })?;
    socket
        .listen(i32::try_from(backlog).unwrap_or(i32::MAX))
        .map_err(listen_error)?;
    #[cfg(unix)]
    socket.set_cloexec(true).map_err(listen_error)?;

    let std_listener: std::net::TcpListener = guard.into_inner().into();
    TcpListener::from_std(std_listener).map_err(listen_error)
}

/// A bound, listening TLS socket.
pub struct Listener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
    context: ServerContext,
    local_addr: SocketAddr,
    handshake_timeout: Option<Duration>,
}

impl Listener {
    /// Accept one connection and complete the server handshake.
    pub async fn accept(&self) -> Result<ChannelPair, TransportError> {
        self.accept_with(&self.acceptor).await
    }

    /// Like [`Listener::accept`], but handshake with `context`.
    pub async fn accept_using(&self, context: &ServerContext) -> Result<ChannelPair, TransportError> {
        let acceptor = context.acceptor()?;
        self.accept_with(&acceptor).await
    }

    async fn accept_with(&self, acceptor: &TlsAcceptor) -> Result<ChannelPair, TransportError> {
        let (stream, peer) = self.inner.accept().await.map_err(TransportError::Accept)?;
        tracing::trace!(peer = %peer, "TCP connection accepted");

        let handshake = acceptor.accept(stream).into_fallible();
        let outcome = match self.handshake_timeout {
            None => handshake.await,
            Some(limit) => match tokio::time::timeout(limit, handshake).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The stream went down with the dropped handshake future.
                    metrics::record_handshake_failure("server");
                    return Err(TransportError::TimedOut {
                        stage: "handshake",
                        peer,
                        after: limit,
                    });
                }
            },
        };

        match outcome {
            Ok(tls) => {
                tracing::debug!(peer = %peer, "TLS handshake completed");
                Ok(ChannelPair::new(peer, tls))
            }
            Err((source, raw)) => {
                SocketGuard::new(raw).close();
                metrics::record_handshake_failure("server");
                Err(TransportError::Handshake { peer, source })
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("context", &self.context)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}
