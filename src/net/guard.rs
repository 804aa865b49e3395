//! Socket acquisition with guaranteed release.
//!
//! # Responsibilities
//! - Own a raw socket while fallible steps run against it
//! - Close it on every failure path before the error propagates
//! - Hand ownership on, untouched, when the steps succeed
//!
//! # Design Decisions
//! - Release happens in `Drop`, so early returns, `?` and cancelled futures
//!   all take the same path
//! - Release errors are logged at trace level and discarded; they must never
//!   mask the error that caused the release

use std::future::Future;
use std::io;
use std::net::{Shutdown, SocketAddr};

use tokio::net::{TcpSocket, TcpStream};

use crate::error::TransportError;

/// A socket handle that can be closed on a best-effort basis.
pub trait Release {
    /// Close the handle. Errors are advisory only.
    fn release(self) -> io::Result<()>;
}

impl Release for TcpSocket {
    fn release(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

impl Release for TcpStream {
    fn release(self) -> io::Result<()> {
        // Shut both directions first so the peer sees FIN even if a clone of
        // the descriptor is still alive somewhere.
        let result = socket2::SockRef::from(&self).shutdown(Shutdown::Both);
        drop(self);
        result
    }
}

impl Release for socket2::Socket {
    fn release(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

/// Owns a socket until it is either handed off or released.
#[derive(Debug)]
pub struct SocketGuard<S: Release> {
    socket: Option<S>,
}

impl<S: Release> SocketGuard<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    /// Borrow the guarded socket.
    pub fn get(&self) -> &S {
        // `socket` is only taken by `into_inner`/`close`, both of which
        // consume the guard.
        match self.socket.as_ref() {
            Some(socket) => socket,
            None => unreachable!("socket guard used after hand-off"),
        }
    }

    /// Disarm the guard and take ownership of the socket.
    pub fn into_inner(mut self) -> S {
        match self.socket.take() {
            Some(socket) => socket,
            None => unreachable!("socket guard used after hand-off"),
        }
    }

    /// Release the socket now instead of at drop.
    pub fn close(mut self) {
        release_quietly(self.socket.take());
    }
}

impl<S: Release> Drop for SocketGuard<S> {
    fn drop(&mut self) {
        release_quietly(self.socket.take());
    }
}

fn release_quietly<S: Release>(socket: Option<S>) {
    if let Some(socket) = socket {
        if let Err(e) = socket.release() {
            tracing::trace!(error = %e, "Ignoring error while releasing socket");
        }
    }
}

/// Run `step` against a guarded socket.
///
/// If the step fails while still holding the guard, the socket is released
/// before the error is returned. On success ownership passes to whatever the
/// step produced.
pub async fn guarded<S, T, F, Fut>(socket: S, step: F) -> Result<T, TransportError>
where
    S: Release,
    F: FnOnce(SocketGuard<S>) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let result = step(SocketGuard::new(socket)).await;
    if let Err(e) = &result {
        tracing::debug!(error = %e, "Socket step failed, socket released");
    }
    result
}

/// Open a non-blocking TCP socket for `addr`'s family and run `step` on it.
pub async fn with_socket<T, F, Fut>(addr: SocketAddr, step: F) -> Result<T, TransportError>
where
    F: FnOnce(SocketGuard<TcpSocket>) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let socket = open_socket(&addr)?;
    guarded(socket, step).await
}

fn open_socket(addr: &SocketAddr) -> Result<TcpSocket, TransportError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    };
    socket.map_err(|source| TransportError::Socket { addr: *addr, source })
}
