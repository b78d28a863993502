//! `SYS` command handler.

use super::executor::Executor;
use crate::error::HandlerError;
use crate::protocols::command::{CommandHandler, HandlerDescriptor, Request};
use bytes::Bytes;
use tracing::info;

pub struct SysHandler<E> {
    executor: E,
}

impl<E: Executor> SysHandler<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: Executor> CommandHandler for SysHandler<E> {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            name: "SYS",
            min_args: 1,
            summary: "run the arguments as a shell command line",
        }
    }

    fn handle(&self, request: &Request) -> Result<Bytes, HandlerError> {
        let command_line = request.args().join(" ");
        info!(command = %command_line, "Executing");

        let output = self.executor.run(&command_line)?;

        // Always reply, even when the command printed nothing.
        if output.is_empty() {
            Ok(request.raw().clone())
        } else {
            Ok(Bytes::from(output))
        }
    }
}
