//! Narrow OS adapters
//!
//! The one readiness-multiplexing operation the poller needs (`poll_fds`),
//! a zero-timeout probe built on it (`check_ready`), and EINTR-retrying
//! raw read/write. POSIX only.

use std::io;
use std::os::fd::RawFd;

/// Wait up to `timeout_ms` for any of `fds` to become ready.
///
/// Returns the number of descriptors with non-zero `revents`. Retries on
/// EINTR; any other failure is the caller's problem.
pub(crate) fn poll_fds(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<usize> {
    loop {
        // SAFETY: fds is a valid, exclusively-borrowed pollfd slice.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// Probe whether `fd` is ready for `events` right now.
///
/// Error conditions (POLLERR/POLLHUP/POLLNVAL) also read as ready: the
/// caller's subsequent syscall will observe the error itself.
pub(crate) fn check_ready(fd: RawFd, events: libc::c_short) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd,
        events,
        revents: 0,
    }];
    let n = poll_fds(&mut fds, 0)?;
    Ok(n > 0 && fds[0].revents != 0)
}

/// Plain `read(2)` with EINTR retry.
pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is a valid, exclusively-borrowed byte buffer.
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// Plain `write(2)` with EINTR retry.
pub(crate) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is a valid byte buffer.
        let ret = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}
