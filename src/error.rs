//! Error types for the command server.
//!
//! Startup and readiness errors are fatal. Per-connection errors never
//! surface here: the event loop handles them by dropping the connection.
//! Handler errors are contained by the dispatcher.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure to bring up the listening socket. The process exits before
/// entering the event loop.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The configured host/port did not form a socket address.
    #[error("Invalid listen address '{0}'")]
    Address(String),

    /// The socket could not be created or configured.
    #[error("Failed to open socket: {0}")]
    Socket(#[source] io::Error),

    /// The socket could not be bound to the requested address.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `listen(2)` failed on the bound socket.
    #[error("Listen failed on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// The readiness wait failed. The server cannot tell which handles are
/// actionable, so the event loop terminates.
#[derive(Debug, Error)]
#[error("Readiness wait failed: {0}")]
pub struct ReadinessError(#[from] pub io::Error);

/// A command handler failed to produce a response.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The external process could not be launched.
    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The external process started but its output could not be collected.
    #[error("failed to collect output of '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}
