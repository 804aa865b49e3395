//! Read/write stream pair over one encrypted socket.
//!
//! # Responsibilities
//! - Split a handshake-completed TLS stream into an input and an output half
//! - Close both halves together, concurrently, without ever failing
//!
//! # Design Decisions
//! - Halves are never closed independently by this crate; `ChannelPair::close`
//!   is the only close path and it consumes the pair
//! - A dropped pair still releases the socket (the halves own it)

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::join;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// Upper bound on sending close_notify and shutting down the write side. A
/// peer that has stopped reading can otherwise hold the close open forever.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A TCP stream after a completed TLS handshake, in either role.
pub type EncryptedSocket = tokio_rustls::TlsStream<TcpStream>;

/// A stream that can be closed asynchronously, best effort.
pub trait CloseStream: Send {
    /// Close the stream. Calling it again after success is a no-op.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

fn stream_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

/// Readable half of a channel pair.
#[derive(Debug)]
pub struct InputStream {
    inner: Option<ReadHalf<EncryptedSocket>>,
}

impl InputStream {
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl AsyncRead for InputStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_read(cx, buf),
            None => Poll::Ready(Err(stream_closed())),
        }
    }
}

impl CloseStream for InputStream {
    async fn close(&mut self) -> io::Result<()> {
        // Nothing to flush on the read side; dropping the half is the close.
        drop(self.inner.take());
        Ok(())
    }
}

/// Writable half of a channel pair.
#[derive(Debug)]
pub struct OutputStream {
    inner: Option<WriteHalf<EncryptedSocket>>,
}

impl OutputStream {
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl AsyncWrite for OutputStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_write(cx, buf),
            None => Poll::Ready(Err(stream_closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_flush(cx),
            None => Poll::Ready(Err(stream_closed())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl CloseStream for OutputStream {
    async fn close(&mut self) -> io::Result<()> {
        let Some(mut half) = self.inner.take() else {
            return Ok(());
        };
        // Sends close_notify, then shuts down the TCP write side. The half is
        // dropped whatever the outcome, which releases the socket once the
        // input half is gone too.
        match tokio::time::timeout(CLOSE_GRACE, half.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "peer did not accept close_notify in time",
            )),
        }
    }
}

/// `(peer, input, output)` derived from one encrypted socket.
#[derive(Debug)]
pub struct ChannelPair<I = InputStream, O = OutputStream> {
    pub peer: SocketAddr,
    pub input: I,
    pub output: O,
}

impl ChannelPair {
    /// Split a handshake-completed socket into a pair.
    pub fn new(peer: SocketAddr, socket: impl Into<EncryptedSocket>) -> Self {
        let (read, write) = tokio::io::split(socket.into());
        Self {
            peer,
            input: InputStream { inner: Some(read) },
            output: OutputStream { inner: Some(write) },
        }
    }
}

impl<I: CloseStream, O: CloseStream> ChannelPair<I, O> {
    pub fn from_parts(peer: SocketAddr, input: I, output: O) -> Self {
        Self {
            peer,
            input,
            output,
        }
    }

    pub fn into_parts(self) -> (SocketAddr, I, O) {
        (self.peer, self.input, self.output)
    }

    /// Close output and input concurrently.
    ///
    /// Each close failure is logged and discarded; this returns only once
    /// both attempts have finished.
    pub async fn close(self) {
        let ChannelPair {
            peer,
            mut input,
            mut output,
        } = self;

        let (output_result, input_result) = join(output.close(), input.close()).await;
        if let Err(e) = output_result {
            tracing::debug!(peer = %peer, error = %e, "Ignoring error closing output stream");
        }
        if let Err(e) = input_result {
            tracing::debug!(peer = %peer, error = %e, "Ignoring error closing input stream");
        }
        tracing::trace!(peer = %peer, "Channel pair closed");
    }
}
