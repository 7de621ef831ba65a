//! Blocking-capable I/O wrappers
//!
//! `read` and `write` behave like the underlying syscalls, with one twist:
//! invoked from inside a fiber on a descriptor that is not immediately
//! ready, they record a pending-I/O entry, suspend the fiber, and let the
//! poller reinject it once the descriptor signals. Invoked outside any
//! fiber they degrade to plain blocking syscalls.
//!
//! Readiness is level-triggered re-check-on-wake: the poller only reports
//! that the descriptor signalled; the woken fiber probes again and performs
//! the syscall itself, parking anew if readiness evaporated in between.

use std::io;
use std::os::fd::RawFd;

use crate::{current, sys};

/// Which readiness events a parked fiber is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    /// Wait for the descriptor to become readable.
    pub const READABLE: Self = Self(0b01);
    /// Wait for the descriptor to become writable.
    pub const WRITABLE: Self = Self(0b10);
    /// Wait for either direction.
    pub const BOTH: Self = Self(0b11);

    /// Check if readable interest is set.
    pub fn is_readable(&self) -> bool {
        self.0 & 0b01 != 0
    }

    /// Check if writable interest is set.
    pub fn is_writable(&self) -> bool {
        self.0 & 0b10 != 0
    }

    /// The `poll(2)` event mask for this interest.
    pub(crate) fn poll_events(&self) -> libc::c_short {
        let mut events = 0;
        if self.is_readable() {
            events |= libc::POLLIN;
        }
        if self.is_writable() {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Descriptor record a fiber leaves behind when it parks on I/O.
///
/// Owned by the fiber until the dispatch loop detaches it and hands fiber
/// and record to the poller; cleared when the poller observes readiness.
#[derive(Debug)]
pub(crate) struct PendingIo {
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
    /// Events the poller actually observed, filled in just before the
    /// fiber is reinjected.
    pub(crate) revents: libc::c_short,
}

impl PendingIo {
    pub(crate) fn new(fd: RawFd, interest: Interest) -> PendingIo {
        PendingIo {
            fd,
            interest,
            revents: 0,
        }
    }
}

/// Read from `fd` into `buf`, like `read(2)`.
///
/// Inside a fiber, a not-yet-readable descriptor suspends the fiber
/// instead of blocking the kernel thread. A zero-length read performs the
/// syscall immediately without ever suspending.
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() || !current::in_fiber() {
        return sys::read(fd, buf);
    }
    loop {
        if sys::check_ready(fd, Interest::READABLE.poll_events())? {
            return sys::read(fd, buf);
        }
        current::park_on_io(PendingIo::new(fd, Interest::READABLE));
    }
}

/// Write `buf` to `fd`, like `write(2)`.
///
/// Inside a fiber, a not-yet-writable descriptor suspends the fiber
/// instead of blocking the kernel thread.
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    if !current::in_fiber() {
        return sys::write(fd, buf);
    }
    loop {
        if sys::check_ready(fd, Interest::WRITABLE.poll_events())? {
            return sys::write(fd, buf);
        }
        current::park_on_io(PendingIo::new(fd, Interest::WRITABLE));
    }
}
