//! cmdserver: a single-threaded, multiplexed TCP command server.
//!
//! One thread waits on every client handle at once, accepts new clients,
//! reads whitespace-tokenized commands, and answers them on the same
//! connection. The only built-in command is `SYS`, which runs a shell
//! command line and is disabled unless explicitly enabled.

pub mod config;
pub mod error;
pub mod protocols;
pub mod runtime;
