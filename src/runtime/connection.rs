//! Per-connection state.
//!
//! A connection is its handle, the stream behind it and a receive buffer.
//! It lives exactly as long as its registry entry; dropping it closes the
//! socket.

use super::multiplexer::wait_writable;
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// Outcome of a single non-blocking receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive {
    /// One message worth of bytes.
    Data(Bytes),
    /// The peer closed its side (receive returned 0).
    Closed,
    /// Nothing to read after all (spurious readiness or a signal).
    Idle,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    handle: RawFd,
    stream: S,
    peer: Option<SocketAddr>,
    buffer: BytesMut,
    buffer_size: usize,
}

impl<S> Connection<S> {
    /// A `buffer_size` of zero is raised to one byte: a zero-length read
    /// would be indistinguishable from the peer closing.
    pub fn new(handle: RawFd, stream: S, peer: Option<SocketAddr>, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            handle,
            stream,
            peer,
            buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
        }
    }

    pub fn handle(&self) -> RawFd {
        self.handle
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl<S: Read + Write> Connection<S> {
    /// Perform one receive of at most `buffer_size` bytes.
    ///
    /// The whole receive is one message; nothing carries over between calls.
    pub fn receive(&mut self) -> io::Result<Receive> {
        self.buffer.clear();
        self.buffer.resize(self.buffer_size, 0);

        match self.stream.read(&mut self.buffer) {
            Ok(0) => Ok(Receive::Closed),
            Ok(n) => {
                self.buffer.truncate(n);
                Ok(Receive::Data(self.buffer.split().freeze()))
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(Receive::Idle)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the whole reply before returning.
    ///
    /// The socket is non-blocking; a full send buffer waits for writability
    /// on this one handle.
    pub fn send_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.stream.write(data) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => data = &data[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_writable(self.handle)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
