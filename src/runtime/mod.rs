//! Connection-multiplexing runtime.
//!
//! - `socket`: opens the passive listening socket
//! - `multiplexer`: readiness wait abstraction, with `select` and `poll`
//!   backends
//! - `registry`: handle -> connection map with deferred removal
//! - `event_loop`: the accept/dispatch/cleanup cycle

mod connection;
mod event_loop;
mod multiplexer;
mod poll;
mod registry;
mod select;
mod socket;

pub use connection::{Connection, Receive};
pub use event_loop::{EventLoop, LoopLimits, Phase, TickReport};
pub use multiplexer::{Multiplexer, ReadinessSet, ReadySet};
pub use poll::PollMultiplexer;
pub use registry::{ClientRegistry, Disposition};
pub use select::SelectMultiplexer;
pub use socket::{open_listener, resolve, Acceptor};

use crate::config::{Config, MultiplexerType};
use crate::error::{ReadinessError, StartupError};
use crate::protocols::command::{Dispatcher, NotFoundPolicy};
use crate::protocols::sys::{ShellExecutor, SysHandler};
use bytes::Bytes;
use std::net::{SocketAddr, TcpListener};
use tracing::{info, warn};

/// A bound listener plus the event loop that serves it.
pub struct Server {
    local_addr: SocketAddr,
    event_loop: EventLoop<TcpListener, Box<dyn Multiplexer>>,
}

impl Server {
    /// Open the listening socket and build the loop around it.
    ///
    /// Any failure here is fatal; nothing has been served yet.
    pub fn bind(config: &Config) -> Result<Self, StartupError> {
        let addr = resolve(&config.host, config.port)?;
        let listener = open_listener(addr, config.backlog)?;
        let local_addr = listener.local_addr().map_err(StartupError::Socket)?;

        let multiplexer: Box<dyn Multiplexer> = match config.multiplexer {
            MultiplexerType::Select => Box::new(SelectMultiplexer::new()),
            MultiplexerType::Poll => Box::new(PollMultiplexer::new()),
        };

        let limits = LoopLimits {
            buffer_size: config.buffer_size,
            max_connections: config.max_connections,
        };
        let event_loop = EventLoop::new(listener, multiplexer, build_dispatcher(config), limits);

        info!(
            addr = %local_addr,
            backlog = config.backlog,
            multiplexer = ?config.multiplexer,
            "Listening"
        );

        Ok(Self {
            local_addr,
            event_loop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the readiness wait fails.
    pub fn run(mut self) -> Result<(), ReadinessError> {
        self.event_loop.run()
    }
}

/// Build the handler table the configuration asks for.
pub fn build_dispatcher(config: &Config) -> Dispatcher {
    let not_found = match &config.unknown_reply {
        Some(reply) => NotFoundPolicy::Reply(Bytes::from(format!("{reply}\n"))),
        None => NotFoundPolicy::Silent,
    };
    let mut dispatcher = Dispatcher::new(not_found);

    if config.enable_sys {
        warn!(
            shell = %config.shell,
            "SYS command enabled: connected clients can run arbitrary commands on this host"
        );
        dispatcher.register(Box::new(SysHandler::new(ShellExecutor::new(
            config.shell.clone(),
        ))));
    }

    dispatcher
}
