//! Outbound TLS connections.
//!
//! # Responsibilities
//! - Open a socket for the destination's family (optionally bound to a
//!   fixed source address)
//! - Connect, run the client handshake, and hand back a channel pair
//! - Never return a partial pair; every failure closes the socket first

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::TransportError;
use crate::net::channel::ChannelPair;
use crate::net::guard::{with_socket, SocketGuard};
use crate::observability::metrics;
use crate::tls::ClientContext;

/// Connect to `destination` and complete a client handshake with `context`.
pub async fn connect(
    context: &ClientContext,
    source: Option<SocketAddr>,
    destination: SocketAddr,
) -> Result<ChannelPair, TransportError> {
    let result = with_socket(destination, |guard| async move {
        if let Some(source) = source {
            guard
                .get()
                .bind(source)
                .map_err(|e| TransportError::Bind { addr: source, source: e })?;
            tracing::trace!(source = %source, "Bound outbound socket");
        }

        // `TcpSocket::connect` consumes the socket and closes it on failure.
        let stream = guard
            .into_inner()
            .connect(destination)
            .await
            .map_err(|source| TransportError::Connect {
                addr: destination,
                source,
            })?;

        client_handshake(context, destination, stream).await
    })
    .await;

    metrics::record_connect(result.is_ok());
    match &result {
        Ok(pair) => tracing::debug!(peer = %pair.peer, version = %context.version(), "TLS connection established"),
        Err(e) => tracing::debug!(destination = %destination, error = %e, "TLS connect failed"),
    }
    result
}

async fn client_handshake(
    context: &ClientContext,
    destination: SocketAddr,
    stream: TcpStream,
) -> Result<ChannelPair, TransportError> {
    let server_name = context.server_name_for(&destination);
    match context
        .connector()
        .connect(server_name, stream)
        .into_fallible()
        .await
    {
        Ok(tls) => Ok(ChannelPair::new(destination, tls)),
        Err((source, raw)) => {
            SocketGuard::new(raw).close();
            metrics::record_handshake_failure("client");
            Err(TransportError::Handshake {
                peer: destination,
                source,
            })
        }
    }
}

/// Client connector holding an injected default context.
#[derive(Debug, Clone)]
pub struct Connector {
    context: Arc<ClientContext>,
    connect_timeout: Option<Duration>,
}

impl Connector {
    pub fn new(context: ClientContext) -> Self {
        Self {
            context: Arc::new(context),
            connect_timeout: None,
        }
    }

    /// Bound the whole connect + handshake sequence.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Connect using this connector's context.
    pub async fn connect(
        &self,
        source: Option<SocketAddr>,
        destination: SocketAddr,
    ) -> Result<ChannelPair, TransportError> {
        self.connect_using(&self.context, source, destination).await
    }

    /// Connect using `context` instead of the connector's own.
    pub async fn connect_using(
        &self,
        context: &ClientContext,
        source: Option<SocketAddr>,
        destination: SocketAddr,
    ) -> Result<ChannelPair, TransportError> {
        let Some(limit) = self.connect_timeout else {
            return connect(context, source, destination).await;
        };

        // Dropping the in-flight future drops whichever socket it holds.
        match tokio::time::timeout(limit, connect(context, source, destination)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut {
                stage: "connect",
                peer: destination,
                after: limit,
            }),
        }
    }
}
