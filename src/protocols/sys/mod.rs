//! `SYS` command: run a command line on the host.
//!
//! ```text
//! Request:  SYS <args...>
//! Response: captured standard output of `<args...>` joined by spaces,
//!           or the request bytes unchanged if the command printed nothing
//! ```
//!
//! This grants every connected client arbitrary command execution with the
//! server's privileges. The handler is only registered when explicitly
//! enabled in the configuration.
//!
//! The command runs to completion on the event loop thread. While it runs no
//! other client is serviced, so a slow or hanging command stalls the whole
//! server.

mod executor;
mod handler;

pub use executor::{Executor, ShellExecutor};
pub use handler::SysHandler;
