//! Client registry with deferred removal.
//!
//! Maps each connection handle to its `Connection` and keeps the readiness
//! set and high-water mark in step with the map. Connections are never
//! removed while the map is being walked: `for_each` and `defer_remove` only
//! queue handles, and `commit_removals` applies the queue once the walk is
//! over.

use super::connection::Connection;
use super::multiplexer::ReadinessSet;
use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::io::RawFd;
use tracing::{debug, trace};

/// What the caller of `for_each` wants done with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Remove,
}

pub struct ClientRegistry<S> {
    listener: RawFd,
    clients: BTreeMap<RawFd, Connection<S>>,
    interest: ReadinessSet,
    high_water: RawFd,
    pending: BTreeSet<RawFd>,
}

impl<S> ClientRegistry<S> {
    /// Create an empty registry watching only the listening handle.
    pub fn new(listener: RawFd) -> Self {
        let mut interest = ReadinessSet::new();
        interest.insert(listener);
        Self {
            listener,
            clients: BTreeMap::new(),
            interest,
            high_water: listener,
            pending: BTreeSet::new(),
        }
    }

    /// Insert a new connection and start watching its handle.
    ///
    /// A handle that is already in use is refused and the connection handed
    /// back, so dropping it cannot close the live socket's descriptor twice.
    pub fn register(&mut self, conn: Connection<S>) -> Result<(), Connection<S>> {
        let handle = conn.handle();
        if handle == self.listener || self.clients.contains_key(&handle) {
            return Err(conn);
        }

        self.clients.insert(handle, conn);
        self.interest.insert(handle);
        self.high_water = self.high_water.max(handle);

        trace!(fd = handle, high_water = self.high_water, "Registered");
        Ok(())
    }

    /// Walk every connection in handle order.
    ///
    /// Returning `Disposition::Remove` queues the handle; the map itself is
    /// not touched until `commit_removals`. Handles already queued are
    /// skipped, so a connection marked for removal is never handed out again.
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(RawFd, &mut Connection<S>) -> Disposition,
    {
        for (&handle, conn) in self.clients.iter_mut() {
            if self.pending.contains(&handle) {
                continue;
            }
            if f(handle, conn) == Disposition::Remove {
                self.pending.insert(handle);
            }
        }
    }

    /// Queue `handle` for removal at the next `commit_removals`.
    pub fn defer_remove(&mut self, handle: RawFd) {
        self.pending.insert(handle);
    }

    /// Apply every queued removal: close the connection, stop watching its
    /// handle, forget it, and recompute the high-water mark if it held it.
    ///
    /// Returns the number of connections closed.
    pub fn commit_removals(&mut self) -> usize {
        let mut closed = 0;

        for handle in std::mem::take(&mut self.pending) {
            let Some(conn) = self.clients.remove(&handle) else {
                continue;
            };
            drop(conn);
            self.interest.remove(handle);
            closed += 1;

            if handle == self.high_water {
                self.high_water = self
                    .clients
                    .keys()
                    .copied()
                    .fold(self.listener, RawFd::max);
            }

            debug!(fd = handle, high_water = self.high_water, "Connection removed");
        }

        closed
    }

    /// Every handle that must be watched: the listener (unless paused) plus
    /// all clients.
    pub fn interest(&self) -> &ReadinessSet {
        &self.interest
    }

    /// Stop watching the listening handle. The high-water mark is left as is.
    pub fn pause_listener(&mut self) {
        self.interest.remove(self.listener);
    }

    pub fn resume_listener(&mut self) {
        self.interest.insert(self.listener);
    }

    pub fn is_listening(&self) -> bool {
        self.interest.contains(self.listener)
    }

    /// Largest handle of interest.
    pub fn high_water(&self) -> RawFd {
        self.high_water
    }

    pub fn contains(&self, handle: RawFd) -> bool {
        self.clients.contains_key(&handle)
    }

    /// Number of registered connections (queued removals included).
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of handles waiting for `commit_removals`.
    pub fn pending_removals(&self) -> usize {
        self.pending.len()
    }

    pub fn handles(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.clients.keys().copied()
    }
}
