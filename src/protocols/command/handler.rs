//! Command handler trait.

use super::parser::Request;
use crate::error::HandlerError;
use bytes::Bytes;

/// Static description of a handler, used as its table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerDescriptor {
    /// Command name matched against the first token (case-sensitive).
    pub name: &'static str,
    /// Arguments required after the name. Fewer means the request is
    /// treated as an unknown command.
    pub min_args: usize,
    /// One-line description for logs.
    pub summary: &'static str,
}

/// A command implementation.
pub trait CommandHandler {
    fn descriptor(&self) -> HandlerDescriptor;

    /// Produce the reply for `request`.
    fn handle(&self, request: &Request) -> Result<Bytes, HandlerError>;
}
