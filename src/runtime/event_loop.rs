//! Single-threaded readiness event loop.
//!
//! Each tick walks the same cycle:
//!
//! ```text
//! Idle -> AwaitingReadiness -> Accept -> Dispatch -> Cleanup -> Idle
//!                  |
//!                  +-> Terminated (readiness wait failed)
//! ```
//!
//! - **AwaitingReadiness**: hand the registry's interest set and high-water
//!   mark to the multiplexer and block until something is ready.
//! - **Accept**: if the listener is ready, accept exactly one connection.
//!   Any further backlog keeps the listener readable, so the next tick
//!   picks it up.
//! - **Dispatch**: walk the registry once. Each ready connection gets one
//!   receive; data is parsed and dispatched, the reply sent back on the same
//!   connection. A closed or failed connection is only queued for removal.
//! - **Cleanup**: commit queued removals before the next wait.
//!
//! `Terminated` is final: once the readiness wait has failed, every further
//! `tick` fails without waiting again.
//!
//! A failed accept (descriptors exhausted, for example) leaves the listener
//! readable. While any client is connected the listener is taken out of the
//! interest set until a removal commits, so the loop does not spin on it.
//!
//! Replies are produced inline, so a slow command handler holds up every
//! other client until it returns.

use super::connection::{Connection, Receive};
use super::multiplexer::{Multiplexer, ReadySet};
use super::registry::{ClientRegistry, Disposition};
use super::socket::Acceptor;
use crate::error::ReadinessError;
use crate::protocols::command::{Dispatcher, Request};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, error, info, trace, warn};

/// Where the loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingReadiness,
    Accept,
    Dispatch,
    Cleanup,
    Terminated,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Distinct handles the multiplexer reported ready.
    pub ready: usize,
    /// Whether a connection was accepted and registered.
    pub accepted: bool,
    /// Connections that received a message this tick.
    pub received: usize,
    /// Connections closed in the cleanup phase.
    pub closed: usize,
}

/// Limits applied by the loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    pub buffer_size: usize,
    pub max_connections: usize,
}

pub struct EventLoop<L: Acceptor, M> {
    listener: L,
    multiplexer: M,
    registry: ClientRegistry<L::Stream>,
    dispatcher: Dispatcher,
    limits: LoopLimits,
    phase: Phase,
    accept_failures: usize,
}

impl<L, M> EventLoop<L, M>
where
    L: Acceptor,
    L::Stream: Read + Write + AsRawFd,
    M: Multiplexer,
{
    pub fn new(listener: L, multiplexer: M, dispatcher: Dispatcher, limits: LoopLimits) -> Self {
        let registry = ClientRegistry::new(listener.handle());
        Self {
            listener,
            multiplexer,
            registry,
            dispatcher,
            limits,
            phase: Phase::Idle,
            accept_failures: 0,
        }
    }

    /// Run ticks until the readiness wait fails.
    pub fn run(&mut self) -> Result<(), ReadinessError> {
        info!(
            listener = self.listener.handle(),
            buffer_size = self.limits.buffer_size,
            max_connections = self.limits.max_connections,
            "Event loop started"
        );

        loop {
            self.tick()?;
        }
    }

    /// Run one full accept/dispatch/cleanup cycle.
    pub fn tick(&mut self) -> Result<TickReport, ReadinessError> {
        if self.phase == Phase::Terminated {
            return Err(ReadinessError(io::Error::other("event loop terminated")));
        }
        let mut report = TickReport::default();

        self.enter(Phase::AwaitingReadiness);
        let ready = match self
            .multiplexer
            .wait(self.registry.interest(), self.registry.high_water())
        {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                // A signal, not a failure: nothing is ready this tick.
                trace!("Readiness wait interrupted");
                ReadySet::new()
            }
            Err(e) => {
                error!(error = %e, "Readiness wait failed - closing down");
                self.enter(Phase::Terminated);
                return Err(ReadinessError(e));
            }
        };
        report.ready = ready.count();
        let mut remaining = ready.count();

        self.enter(Phase::Accept);
        if ready.is_ready(self.listener.handle()) {
            report.accepted = self.accept_one();
            remaining -= 1;
        }

        self.enter(Phase::Dispatch);
        report.received = self.dispatch_ready(&ready, remaining);

        self.enter(Phase::Cleanup);
        report.closed = self.registry.commit_removals();
        if report.closed > 0 && !self.registry.is_listening() {
            debug!(clients = self.registry.len(), "Listener resumed");
            self.registry.resume_listener();
        }

        self.enter(Phase::Idle);
        Ok(report)
    }

    fn enter(&mut self, phase: Phase) {
        trace!(from = ?self.phase, to = ?phase, "Phase");
        self.phase = phase;
    }

    /// Accept a single pending connection and register it.
    fn accept_one(&mut self) -> bool {
        let (stream, peer) = match self.listener.accept_one() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(e) => {
                self.accept_failures += 1;
                if self.accept_failures == 1 {
                    warn!(error = %e, "Accept error");
                } else {
                    trace!(error = %e, failures = self.accept_failures, "Accept error");
                }
                // Nothing can free a descriptor while no client is connected.
                if !self.registry.is_empty() {
                    debug!(clients = self.registry.len(), "Listener paused until a client closes");
                    self.registry.pause_listener();
                }
                return false;
            }
        };
        if self.accept_failures > 0 {
            info!(failures = self.accept_failures, "Accepting again");
            self.accept_failures = 0;
        }
        let handle = stream.as_raw_fd();

        if self.registry.len() >= self.limits.max_connections {
            warn!(fd = handle, "Connection limit reached, rejecting connection");
            return false;
        }
        if !self.multiplexer.can_watch(handle) {
            warn!(fd = handle, "Handle cannot be watched by this multiplexer, rejecting connection");
            return false;
        }

        let conn = Connection::new(handle, stream, peer, self.limits.buffer_size);
        if self.registry.register(conn).is_err() {
            error!(fd = handle, "Handle already registered, rejecting connection");
            return false;
        }

        info!(
            fd = handle,
            peer = ?peer,
            clients = self.registry.len(),
            "Client connected"
        );
        true
    }

    /// Give every ready connection one receive. Returns how many received a
    /// message.
    fn dispatch_ready(&mut self, ready: &ReadySet, mut remaining: usize) -> usize {
        let dispatcher = &self.dispatcher;
        let mut received = 0;

        self.registry.for_each(|handle, conn| {
            if remaining == 0 || !ready.is_ready(handle) {
                return Disposition::Keep;
            }
            remaining -= 1;

            match conn.receive() {
                Ok(Receive::Data(raw)) => {
                    received += 1;
                    respond(handle, conn, dispatcher, raw)
                }
                Ok(Receive::Closed) => {
                    info!(fd = handle, peer = ?conn.peer(), "Client closed connection");
                    Disposition::Remove
                }
                Ok(Receive::Idle) => Disposition::Keep,
                Err(e) => {
                    info!(fd = handle, error = %e, "Receive failed, dropping client");
                    Disposition::Remove
                }
            }
        });

        received
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &ClientRegistry<L::Stream> {
        &self.registry
    }
}

/// Parse, dispatch and answer one message.
fn respond<S: Read + Write>(
    handle: RawFd,
    conn: &mut Connection<S>,
    dispatcher: &Dispatcher,
    raw: bytes::Bytes,
) -> Disposition {
    debug!(fd = handle, bytes = raw.len(), "Message received");

    let Some(request) = Request::parse(raw) else {
        trace!(fd = handle, "Empty message ignored");
        return Disposition::Keep;
    };
    let Some(reply) = dispatcher.dispatch(&request) else {
        return Disposition::Keep;
    };

    match conn.send_all(&reply) {
        Ok(()) => {
            debug!(fd = handle, bytes = reply.len(), "Reply sent");
            Disposition::Keep
        }
        Err(e) => {
            info!(fd = handle, error = %e, "Send failed, dropping client");
            Disposition::Remove
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::command::NotFoundPolicy;
    use crate::protocols::sys::{ShellExecutor, SysHandler};
    use crate::runtime::connection::test_support::{FakeStream, Step, WriteStep};
    use crate::runtime::multiplexer::ReadinessSet;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::net::SocketAddr;

    const LISTENER: RawFd = 3;

    /// Hands out queued fake connections and accept failures.
    struct ScriptedAcceptor {
        pending: RefCell<VecDeque<Result<FakeStream, io::ErrorKind>>>,
    }

    impl ScriptedAcceptor {
        fn new() -> Self {
            Self {
                pending: RefCell::new(VecDeque::new()),
            }
        }

        fn fail(&self, kind: io::ErrorKind) {
            self.pending.borrow_mut().push_back(Err(kind));
        }
    }

    impl Acceptor for &ScriptedAcceptor {
        type Stream = FakeStream;

        fn handle(&self) -> RawFd {
            LISTENER
        }

        fn accept_one(&self) -> io::Result<(FakeStream, Option<SocketAddr>)> {
            match self.pending.borrow_mut().pop_front() {
                Some(Ok(stream)) => Ok((stream, None)),
                Some(Err(kind)) => Err(io::Error::from(kind)),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    /// Replays scripted readiness results and records what it was asked.
    #[derive(Default)]
    struct ScriptedMultiplexer {
        script: VecDeque<io::Result<ReadySet>>,
        calls: Vec<(ReadinessSet, RawFd)>,
        limit: Option<RawFd>,
    }

    impl ScriptedMultiplexer {
        fn ready(mut self, handles: &[RawFd]) -> Self {
            self.script.push_back(Ok(handles.iter().copied().collect()));
            self
        }

        fn fail(mut self, kind: io::ErrorKind) -> Self {
            self.script.push_back(Err(io::Error::from(kind)));
            self
        }
    }

    impl Multiplexer for ScriptedMultiplexer {
        fn wait(&mut self, interest: &ReadinessSet, high_water: RawFd) -> io::Result<ReadySet> {
            self.calls.push((interest.clone(), high_water));
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::other("script exhausted")))
        }

        fn can_watch(&self, handle: RawFd) -> bool {
            self.limit.map_or(true, |limit| handle < limit)
        }
    }

    fn limits() -> LoopLimits {
        LoopLimits {
            buffer_size: 1024,
            max_connections: 16,
        }
    }

    fn sys_dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(Box::new(SysHandler::new(ShellExecutor::default())));
        dispatcher
    }

    fn client(acceptor: &ScriptedAcceptor, handle: RawFd) -> FakeStream {
        let stream = FakeStream::with_handle(handle);
        acceptor.pending.borrow_mut().push_back(Ok(stream.observer()));
        stream
    }

    #[test]
    fn test_accepts_one_connection_per_tick() {
        let acceptor = ScriptedAcceptor::new();
        client(&acceptor, 5);
        client(&acceptor, 6);
        client(&acceptor, 7);

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER])
            .ready(&[LISTENER]);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        let report = event_loop.tick().unwrap();
        assert!(report.accepted);
        assert_eq!(event_loop.registry().len(), 1);
        assert_eq!(event_loop.registry().high_water(), 5);

        event_loop.tick().unwrap();
        event_loop.tick().unwrap();
        assert_eq!(event_loop.registry().len(), 3);
        assert_eq!(event_loop.registry().high_water(), 7);
        assert_eq!(event_loop.phase(), Phase::Idle);
    }

    #[test]
    fn test_waits_on_listener_and_every_client() {
        let acceptor = ScriptedAcceptor::new();
        client(&acceptor, 5);

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[]);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());
        event_loop.tick().unwrap();
        event_loop.tick().unwrap();

        let calls = &event_loop.multiplexer.calls;
        assert_eq!(calls[0].0.iter().collect::<Vec<_>>(), vec![LISTENER]);
        assert_eq!(calls[0].1, LISTENER);
        assert_eq!(calls[1].0.iter().collect::<Vec<_>>(), vec![LISTENER, 5]);
        assert_eq!(calls[1].1, 5);
    }

    #[test]
    fn test_sys_reply_is_sent_on_same_connection() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        let b = client(&acceptor, 6);
        a.push(Step::Data(b"SYS echo hello".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER])
            .ready(&[5]);
        let mut event_loop = EventLoop::new(&acceptor, mux, sys_dispatcher(), limits());
        for _ in 0..3 {
            event_loop.tick().unwrap();
        }

        assert_eq!(a.written(), b"hello\n");
        assert!(b.written().is_empty());
        assert_eq!(b.read_calls(), 0);
    }

    #[test]
    fn test_unknown_command_gets_no_reply() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        a.push(Step::Data(b"UNKNOWN".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[5]);
        let mut event_loop = EventLoop::new(&acceptor, mux, sys_dispatcher(), limits());
        event_loop.tick().unwrap();
        let report = event_loop.tick().unwrap();

        assert_eq!(report.received, 1);
        assert!(a.written().is_empty());
        assert!(event_loop.registry().contains(5));
    }

    #[test]
    fn test_unknown_command_reply_policy() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        a.push(Step::Data(b"UNKNOWN".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[5]);
        let dispatcher = Dispatcher::new(NotFoundPolicy::Reply(bytes::Bytes::from_static(
            b"ERR unknown command\n",
        )));
        let mut event_loop = EventLoop::new(&acceptor, mux, dispatcher, limits());
        event_loop.tick().unwrap();
        event_loop.tick().unwrap();

        assert_eq!(a.written(), b"ERR unknown command\n");
    }

    #[test]
    fn test_closed_connection_is_removed_and_never_read_again() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 9);
        let b = client(&acceptor, 5);
        a.push(Step::Eof);
        b.push(Step::Data(b"SYS echo still here".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER])
            .ready(&[5, 9])
            // Stale report for the removed handle.
            .ready(&[9]);
        let mut event_loop = EventLoop::new(&acceptor, mux, sys_dispatcher(), limits());
        event_loop.tick().unwrap();
        event_loop.tick().unwrap();
        assert_eq!(event_loop.registry().high_water(), 9);

        let report = event_loop.tick().unwrap();
        assert_eq!(report.closed, 1);
        assert_eq!(report.received, 1);
        assert!(!event_loop.registry().contains(9));
        assert!(!event_loop.registry().interest().contains(9));
        assert_eq!(event_loop.registry().high_water(), 5);
        assert_eq!(b.written(), b"still here\n");

        event_loop.tick().unwrap();
        assert_eq!(a.read_calls(), 1);
        // The removed handle was not offered to the multiplexer again.
        let (interest, high_water) = event_loop.multiplexer.calls.last().unwrap();
        assert!(!interest.contains(9));
        assert_eq!(*high_water, 5);
    }

    #[test]
    fn test_receive_error_only_drops_that_connection() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        let b = client(&acceptor, 6);
        a.push(Step::Error(io::ErrorKind::ConnectionReset));
        b.push(Step::Data(b"SYS echo ok".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER])
            .ready(&[5, 6]);
        let mut event_loop = EventLoop::new(&acceptor, mux, sys_dispatcher(), limits());
        for _ in 0..3 {
            event_loop.tick().unwrap();
        }

        assert!(!event_loop.registry().contains(5));
        assert!(event_loop.registry().contains(6));
        assert_eq!(b.written(), b"ok\n");
    }

    #[test]
    fn test_spurious_readiness_keeps_connection() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[5]);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());
        event_loop.tick().unwrap();
        let report = event_loop.tick().unwrap();

        assert_eq!(a.read_calls(), 1);
        assert_eq!(report.received, 0);
        assert!(event_loop.registry().contains(5));
    }

    #[test]
    fn test_whitespace_only_message_is_not_dispatched() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        a.push(Step::Data(b" \r\n".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[5]);
        let dispatcher = Dispatcher::new(NotFoundPolicy::Reply(bytes::Bytes::from_static(b"?")));
        let mut event_loop = EventLoop::new(&acceptor, mux, dispatcher, limits());
        event_loop.tick().unwrap();
        event_loop.tick().unwrap();

        assert!(a.written().is_empty());
    }

    #[test]
    fn test_empty_listener_readiness_is_harmless() {
        let acceptor = ScriptedAcceptor::new();
        let mux = ScriptedMultiplexer::default().ready(&[LISTENER]);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        let report = event_loop.tick().unwrap();
        assert!(!report.accepted);
        assert!(event_loop.registry().is_empty());
    }

    #[test]
    fn test_connection_limit() {
        let acceptor = ScriptedAcceptor::new();
        client(&acceptor, 5);
        let rejected = client(&acceptor, 6);

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER]);
        let limits = LoopLimits {
            buffer_size: 1024,
            max_connections: 1,
        };
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits);
        assert!(event_loop.tick().unwrap().accepted);
        assert!(!event_loop.tick().unwrap().accepted);

        assert_eq!(event_loop.registry().len(), 1);
        assert!(!event_loop.registry().contains(rejected.handle));
    }

    #[test]
    fn test_unwatchable_handle_is_rejected() {
        let acceptor = ScriptedAcceptor::new();
        client(&acceptor, 2000);

        let mut mux = ScriptedMultiplexer::default().ready(&[LISTENER]);
        mux.limit = Some(1024);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        assert!(!event_loop.tick().unwrap().accepted);
        assert_eq!(event_loop.registry().high_water(), LISTENER);
    }

    #[test]
    fn test_interrupted_wait_is_an_empty_tick() {
        let acceptor = ScriptedAcceptor::new();
        let mux = ScriptedMultiplexer::default().fail(io::ErrorKind::Interrupted);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        assert_eq!(event_loop.tick().unwrap(), TickReport::default());
        assert_eq!(event_loop.phase(), Phase::Idle);
    }

    #[test]
    fn test_readiness_failure_terminates() {
        let acceptor = ScriptedAcceptor::new();
        let mux = ScriptedMultiplexer::default()
            .ready(&[])
            .fail(io::ErrorKind::InvalidInput);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        let err = event_loop.run().unwrap_err();
        assert_eq!(err.0.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(event_loop.phase(), Phase::Terminated);
        assert_eq!(event_loop.multiplexer.calls.len(), 2);
    }

    #[test]
    fn test_terminated_is_final() {
        let acceptor = ScriptedAcceptor::new();
        let mux = ScriptedMultiplexer::default()
            .fail(io::ErrorKind::InvalidInput)
            .ready(&[]);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        assert!(event_loop.tick().is_err());
        assert!(event_loop.tick().is_err());
        assert_eq!(event_loop.phase(), Phase::Terminated);
        assert_eq!(event_loop.multiplexer.calls.len(), 1);
    }

    #[test]
    fn test_send_failure_only_drops_that_connection() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        let b = client(&acceptor, 6);
        a.push(Step::Data(b"SYS echo lost".to_vec()));
        a.push_write(WriteStep::Error(io::ErrorKind::BrokenPipe));
        b.push(Step::Data(b"SYS echo ok".to_vec()));

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER])
            .ready(&[5, 6]);
        let mut event_loop = EventLoop::new(&acceptor, mux, sys_dispatcher(), limits());
        event_loop.tick().unwrap();
        event_loop.tick().unwrap();
        let report = event_loop.tick().unwrap();

        assert_eq!(report.received, 2);
        assert_eq!(report.closed, 1);
        assert!(!event_loop.registry().contains(5));
        assert!(a.written().is_empty());
        assert_eq!(b.written(), b"ok\n");
    }

    #[test]
    fn test_accept_failure_pauses_listener_until_a_client_closes() {
        let acceptor = ScriptedAcceptor::new();
        let a = client(&acceptor, 5);
        acceptor.fail(io::ErrorKind::Other);
        acceptor.fail(io::ErrorKind::Other);
        client(&acceptor, 6);
        a.push(Step::Eof);

        let mux = ScriptedMultiplexer::default()
            .ready(&[LISTENER])
            .ready(&[LISTENER])
            .ready(&[5])
            .ready(&[LISTENER])
            .ready(&[LISTENER]);
        let mut event_loop = EventLoop::new(&acceptor, mux, Dispatcher::default(), limits());

        assert!(event_loop.tick().unwrap().accepted);
        assert!(!event_loop.tick().unwrap().accepted);
        assert!(!event_loop.registry().is_listening());
        assert!(event_loop.registry().contains(5));

        // The next wait leaves the listener out; the close brings it back.
        let report = event_loop.tick().unwrap();
        assert_eq!(report.closed, 1);
        assert!(event_loop.registry().is_listening());
        assert!(!event_loop.multiplexer.calls[2].0.contains(LISTENER));

        // With no clients left the listener stays watched after a failure.
        assert!(!event_loop.tick().unwrap().accepted);
        assert!(event_loop.registry().is_listening());

        assert!(event_loop.tick().unwrap().accepted);
        assert!(event_loop.registry().contains(6));
        assert_eq!(event_loop.accept_failures, 0);
    }
}
