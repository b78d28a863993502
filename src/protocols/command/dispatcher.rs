//! Command dispatch.

use super::handler::CommandHandler;
use super::parser::Request;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What to send back when no handler matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// Send nothing. The client gets no acknowledgment.
    #[default]
    Silent,
    /// Send these bytes.
    Reply(Bytes),
}

/// Handler table keyed by command name.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
    not_found: NotFoundPolicy,
}

impl Dispatcher {
    pub fn new(not_found: NotFoundPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            not_found,
        }
    }

    /// Add a handler, replacing any previous one with the same name.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        let descriptor = handler.descriptor();
        info!(
            command = descriptor.name,
            min_args = descriptor.min_args,
            summary = descriptor.summary,
            "Registered command"
        );
        self.handlers.insert(descriptor.name, handler);
    }

    /// Remove the handler for `name`, if any.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Route `request` to its handler and return the reply, if any.
    ///
    /// Handler failures are contained here: they are logged and answered
    /// with an `ERR` line, never propagated to the event loop.
    pub fn dispatch(&self, request: &Request) -> Option<Bytes> {
        let handler = self
            .handlers
            .get(request.command())
            .filter(|h| request.args().len() >= h.descriptor().min_args);

        let Some(handler) = handler else {
            info!(
                command = request.command(),
                raw = %String::from_utf8_lossy(request.raw()).trim_end(),
                "Unknown command from client"
            );
            return match &self.not_found {
                NotFoundPolicy::Silent => None,
                NotFoundPolicy::Reply(bytes) => Some(bytes.clone()),
            };
        };

        debug!(command = request.command(), args = request.args().len(), "Dispatching");

        match handler.handle(request) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(command = request.command(), error = %e, "Command failed");
                Some(Bytes::from(format!("ERR {e}\n")))
            }
        }
    }
}
