//! Token-based command protocol.
//!
//! An entire receive buffer is one message. The message is split on
//! whitespace (no quoting); the first token names the command and the rest
//! are its arguments.
//!
//! ```text
//! Request:  SYS echo hello
//! Response: hello\n
//! ```
//!
//! Handlers live in a table keyed by command name (case-sensitive). A name
//! with no handler falls through to the dispatcher's `NotFoundPolicy`; the
//! default policy sends nothing back.

mod dispatcher;
mod handler;
mod parser;

pub use dispatcher::{Dispatcher, NotFoundPolicy};
pub use handler::{CommandHandler, HandlerDescriptor};
pub use parser::{parse, Request};
