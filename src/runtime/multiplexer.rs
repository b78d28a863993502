//! Readiness multiplexing abstractions.
//!
//! The event loop keeps a `ReadinessSet` of every handle it cares about and
//! hands it to a `Multiplexer` once per tick. Backends never mutate that set:
//! each call builds a fresh working copy (an `fd_set` or a `pollfd` array),
//! so a handle removed in the previous cleanup step can never be reported.

use std::collections::BTreeSet;
use std::io;
use std::os::unix::io::RawFd;

/// Handles currently of interest: the listener plus every registered client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessSet {
    handles: BTreeSet<RawFd>,
}

impl ReadinessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: RawFd) -> bool {
        self.handles.insert(handle)
    }

    pub fn remove(&mut self, handle: RawFd) -> bool {
        self.handles.remove(&handle)
    }

    pub fn contains(&self, handle: RawFd) -> bool {
        self.handles.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handles in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.handles.iter().copied()
    }
}

impl FromIterator<RawFd> for ReadinessSet {
    fn from_iter<I: IntoIterator<Item = RawFd>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

/// Result of one readiness wait.
///
/// A handle is ready if it is readable or in an exceptional state; both are
/// reported the same way since the loop answers either with a receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadySet {
    ready: BTreeSet<RawFd>,
}

impl ReadySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, handle: RawFd) {
        self.ready.insert(handle);
    }

    pub fn is_ready(&self, handle: RawFd) -> bool {
        self.ready.contains(&handle)
    }

    /// Number of distinct ready handles.
    pub fn count(&self) -> usize {
        self.ready.len()
    }
}

impl FromIterator<RawFd> for ReadySet {
    fn from_iter<I: IntoIterator<Item = RawFd>>(iter: I) -> Self {
        Self {
            ready: iter.into_iter().collect(),
        }
    }
}

/// A readiness-polling primitive.
pub trait Multiplexer {
    /// Block with no timeout until at least one handle in `interest` is
    /// readable or exceptional.
    ///
    /// `high_water` is the largest handle in `interest`; backends whose scan
    /// cost depends on handle values use it as the scan bound.
    fn wait(&mut self, interest: &ReadinessSet, high_water: RawFd) -> io::Result<ReadySet>;

    /// Whether this backend can watch `handle` at all.
    fn can_watch(&self, handle: RawFd) -> bool {
        handle >= 0
    }
}

impl<M: Multiplexer + ?Sized> Multiplexer for Box<M> {
    fn wait(&mut self, interest: &ReadinessSet, high_water: RawFd) -> io::Result<ReadySet> {
        (**self).wait(interest, high_water)
    }

    fn can_watch(&self, handle: RawFd) -> bool {
        (**self).can_watch(handle)
    }
}

/// Block until `handle` is writable.
///
/// Used to finish a reply on a non-blocking socket whose send buffer is full.
pub fn wait_writable(handle: RawFd) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd: handle,
        events: libc::POLLOUT,
        revents: 0,
    };

    loop {
        // SAFETY: `pfd` is a valid pollfd array of length one.
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
