//! `select(2)` backend.
//!
//! The high-water mark bounds the kernel scan (`nfds = high_water + 1`).
//! Handles at or above `FD_SETSIZE` cannot be represented in an `fd_set`, so
//! the event loop refuses to register them with this backend.

use super::multiplexer::{Multiplexer, ReadinessSet, ReadySet};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

#[derive(Debug, Default)]
pub struct SelectMultiplexer;

impl SelectMultiplexer {
    pub fn new() -> Self {
        Self
    }
}

fn empty_set() -> libc::fd_set {
    // SAFETY: fd_set is plain data; FD_ZERO puts it in its defined empty state.
    unsafe {
        let mut set: libc::fd_set = mem::zeroed();
        libc::FD_ZERO(&mut set);
        set
    }
}

impl Multiplexer for SelectMultiplexer {
    fn wait(&mut self, interest: &ReadinessSet, high_water: RawFd) -> io::Result<ReadySet> {
        // Fresh working copies each call; `interest` is never touched.
        let mut read_set = empty_set();
        let mut except_set = empty_set();

        for handle in interest.iter() {
            if !self.can_watch(handle) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("handle {handle} exceeds FD_SETSIZE"),
                ));
            }
            // SAFETY: handle is within [0, FD_SETSIZE).
            unsafe {
                libc::FD_SET(handle, &mut read_set);
                libc::FD_SET(handle, &mut except_set);
            }
        }

        // SAFETY: both sets are initialized; no write set, no timeout.
        let rc = unsafe {
            libc::select(
                high_water + 1,
                &mut read_set,
                ptr::null_mut(),
                &mut except_set,
                ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ready = ReadySet::new();
        for handle in interest.iter() {
            // SAFETY: handle was validated above.
            let hit = unsafe {
                libc::FD_ISSET(handle, &read_set) || libc::FD_ISSET(handle, &except_set)
            };
            if hit {
                ready.mark(handle);
            }
        }

        Ok(ready)
    }

    fn can_watch(&self, handle: RawFd) -> bool {
        handle >= 0 && (handle as usize) < libc::FD_SETSIZE as usize
    }
}
