//! Listening socket creation.
//!
//! The listener is opened through socket2 so address reuse can be set before
//! bind, and is left non-blocking so a spurious readiness report on the
//! listening handle never stalls the loop in `accept`.

use crate::error::StartupError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// Source of new connections for the event loop.
///
/// Implemented for `std::net::TcpListener`; the loop only needs a handle to
/// watch and a way to take one pending connection.
pub trait Acceptor {
    type Stream;

    /// Handle watched for read readiness.
    fn handle(&self) -> RawFd;

    /// Take one pending connection. `WouldBlock` means none is pending.
    fn accept_one(&self) -> io::Result<(Self::Stream, Option<SocketAddr>)>;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn handle(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn accept_one(&self) -> io::Result<(TcpStream, Option<SocketAddr>)> {
        let (stream, peer) = self.accept()?;
        // Accepted sockets do not inherit O_NONBLOCK on every platform.
        stream.set_nonblocking(true)?;
        Ok((stream, Some(peer)))
    }
}

/// Resolve `host:port` into a single socket address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, StartupError> {
    let target = format!("{host}:{port}");
    target
        .to_socket_addrs()
        .map_err(|_| StartupError::Address(target.clone()))?
        .next()
        .ok_or(StartupError::Address(target))
}

/// Open a passive, non-blocking TCP socket bound to `addr`.
///
/// `SO_REUSEADDR` is set so a restart on the same port does not fail while
/// old connections sit in TIME_WAIT.
pub fn open_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, StartupError> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(StartupError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(StartupError::Socket)?;
    socket.set_nonblocking(true).map_err(StartupError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| StartupError::Bind { addr, source })?;
    socket
        .listen(backlog)
        .map_err(|source| StartupError::Listen { addr, source })?;

    debug!(addr = %addr, backlog, fd = socket.as_raw_fd(), "Listener opened");

    Ok(socket.into())
}
