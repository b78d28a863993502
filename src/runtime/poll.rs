//! `poll(2)` backend.
//!
//! No `FD_SETSIZE` ceiling. The `pollfd` array is scratch space rebuilt from
//! the interest set on every call.

use super::multiplexer::{Multiplexer, ReadinessSet, ReadySet};
use std::io;
use std::os::unix::io::RawFd;

const READY_MASK: libc::c_short =
    libc::POLLIN | libc::POLLPRI | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

#[derive(Debug, Default)]
pub struct PollMultiplexer {
    scratch: Vec<libc::pollfd>,
}

impl PollMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(&mut self, interest: &ReadinessSet, _high_water: RawFd) -> io::Result<ReadySet> {
        self.scratch.clear();
        self.scratch.extend(interest.iter().map(|fd| libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        }));

        // SAFETY: scratch holds exactly `len` initialized pollfd entries.
        let rc = unsafe {
            libc::poll(
                self.scratch.as_mut_ptr(),
                self.scratch.len() as libc::nfds_t,
                -1,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(self
            .scratch
            .iter()
            .filter(|pfd| pfd.revents & READY_MASK != 0)
            .map(|pfd| pfd.fd)
            .collect())
    }
}
