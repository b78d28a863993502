//! Protocol implementations.
//!
//! - `command`: whitespace-tokenized command protocol and the handler table
//! - `sys`: the `SYS` handler, which runs a command line on the host

pub mod command;
pub mod sys;
