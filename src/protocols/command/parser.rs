//! Command message parser.

use bytes::Bytes;

/// Split a raw message into whitespace-delimited tokens.
///
/// Invalid UTF-8 is replaced rather than rejected; the raw bytes are kept
/// alongside the tokens in `Request` for handlers that echo them back.
pub fn parse(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// A parsed message with at least one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    raw: Bytes,
    tokens: Vec<String>,
}

impl Request {
    /// Parse `raw` into a request. Returns `None` for a message with no
    /// tokens, which must not be dispatched.
    pub fn parse(raw: Bytes) -> Option<Self> {
        let tokens = parse(&raw);
        if tokens.is_empty() {
            return None;
        }
        Some(Self { raw, tokens })
    }

    /// The command name (first token).
    pub fn command(&self) -> &str {
        &self.tokens[0]
    }

    /// Tokens after the command name.
    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    /// The message exactly as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}
