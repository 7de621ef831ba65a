//! Asynchronous I/O poller
//!
//! A dedicated thread multiplexing readiness for every fiber parked on
//! I/O. The dispatch loop hands such fibers here (a full ownership move)
//! instead of requeueing them; once their descriptor signals, the poller
//! pushes them back into the scheduler's ready pool. It never resumes a
//! fiber itself.
//!
//! Slot 0 of the wait set is always the wake pipe: `register` and
//! `request_shutdown` write one byte to it so an in-flight `poll` returns
//! immediately and picks up the new descriptor or the shutdown flag,
//! instead of waiting out its timeout.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filament_core::{kwarn, SchedError, SchedResult};

use crate::fiber::Fiber;
use crate::io::PendingIo;
use crate::scheduler::Shared;
use crate::sys;

/// A fiber parked on I/O, together with the descriptor record it left
/// behind. `seq` identifies the entry across the unlocked poll window.
struct Waiter {
    seq: u64,
    io: PendingIo,
    fiber: Fiber,
}

/// State shared between the poller thread, the scheduler and `Scheduler`
/// teardown.
pub(crate) struct PollerShared {
    waiting: Mutex<Vec<Waiter>>,
    /// Fibers currently in (or in flight out of) the table. Incremented by
    /// `register` and decremented after reinjection, both under the
    /// scheduler mutex, so `joinable()` sees a consistent snapshot.
    pending: AtomicUsize,
    next_seq: AtomicU64,
    shutdown: AtomicBool,
    wake_write: OwnedFd,
    poll_interval: Duration,
}

impl PollerShared {
    /// Create the shared state and its wake pipe; returns the pipe's read
    /// end for the poller thread.
    ///
    /// Both pipe ends are non-blocking: the read end so draining pending
    /// wake bytes never stalls the poller, the write end so `wake()` on a
    /// full pipe fails with EAGAIN (a full pipe already guarantees a
    /// pending wake) instead of stalling its caller.
    pub(crate) fn new(poll_interval: Duration) -> SchedResult<(Arc<PollerShared>, OwnedFd)> {
        let (wake_read, wake_write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_NONBLOCK)
            .map_err(|e| SchedError::WakePipe(e as i32))?;

        let shared = Arc::new(PollerShared {
            waiting: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            wake_write,
            poll_interval,
        });
        Ok((shared, wake_read))
    }

    /// Take ownership of a fiber that suspended with a pending-I/O record.
    ///
    /// Called by the dispatch loop under the scheduler mutex.
    pub(crate) fn register(&self, fiber: Fiber, io: PendingIo) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.waiting.lock().unwrap().push(Waiter { seq, io, fiber });
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.wake();
    }

    /// Fibers parked on I/O, as seen by the scheduler's joinable predicate.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Called by the scheduler once a reinjected fiber is back in the
    /// ready pool, still under the scheduler mutex.
    pub(crate) fn note_reinjected(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    /// Ask the poller thread to exit its loop and drain.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake();
    }

    fn wake(&self) {
        // A full pipe already guarantees a pending wake; ignore the result.
        let _ = sys::write(self.wake_write.as_raw_fd(), &[1]);
    }
}

/// Poller thread body.
pub(crate) fn run(poller: Arc<PollerShared>, wake_read: OwnedFd, sched: Arc<Shared>) {
    let wake_fd = wake_read.as_raw_fd();

    while !poller.shutdown.load(Ordering::Acquire) {
        poll_once(&poller, wake_fd, &sched);
    }

    // Best-effort drain: reinject every still-parked fiber so the fiber
    // count can reach zero and join_all can return. Their I/O calls will
    // observe whatever the descriptor does next.
    let drained: Vec<Waiter> = {
        let mut waiting = poller.waiting.lock().unwrap();
        waiting.drain(..).collect()
    };
    for waiter in drained {
        sched.reinject(waiter.fiber);
    }
}

/// One bounded wait on the union of the wake pipe and all registered
/// descriptors, reinjecting every fiber whose descriptor signalled.
///
/// With an empty table this degrades to sleeping on just the wake pipe for
/// the poll interval, so an idle poller never busy-loops.
fn poll_once(poller: &PollerShared, wake_fd: RawFd, sched: &Shared) {
    let timeout_ms = poller.poll_interval.as_millis().max(1) as i32;

    let mut pfds = vec![libc::pollfd {
        fd: wake_fd,
        events: libc::POLLIN,
        revents: 0,
    }];
    let mut seqs = vec![0u64]; // parallel to pfds; slot 0 is the wake pipe
    {
        let waiting = poller.waiting.lock().unwrap();
        for waiter in waiting.iter() {
            pfds.push(libc::pollfd {
                fd: waiter.io.fd,
                events: waiter.io.interest.poll_events(),
                revents: 0,
            });
            seqs.push(waiter.seq);
        }
    }

    let ready_count = match sys::poll_fds(&mut pfds, timeout_ms) {
        Ok(n) => n,
        Err(err) => {
            kwarn!("poller: poll failed: {}", err);
            std::thread::sleep(poller.poll_interval);
            return;
        }
    };
    if ready_count == 0 {
        return;
    }

    if pfds[0].revents != 0 {
        drain_wake_pipe(wake_fd);
    }

    // Descriptor-level errors count as readiness: the woken fiber's own
    // syscall reports them. Reinjection order is ascending fd to keep
    // tests reproducible.
    let mut ready: Vec<(RawFd, u64, libc::c_short)> = pfds[1..]
        .iter()
        .zip(&seqs[1..])
        .filter(|(pfd, _)| pfd.revents != 0)
        .map(|(pfd, seq)| (pfd.fd, *seq, pfd.revents))
        .collect();
    if ready.is_empty() {
        return;
    }
    ready.sort_by_key(|(fd, _, _)| *fd);

    let mut fibers = Vec::with_capacity(ready.len());
    {
        let mut waiting = poller.waiting.lock().unwrap();
        for (_, seq, revents) in ready {
            // Entries are only removed here, so a seq either still exists
            // or belonged to a previous incarnation of the fd.
            if let Some(pos) = waiting.iter().position(|w| w.seq == seq) {
                let mut waiter = waiting.remove(pos);
                waiter.io.revents = revents;
                fibers.push(waiter.fiber);
            }
        }
    }
    for fiber in fibers {
        sched.reinject(fiber);
    }
}

fn drain_wake_pipe(wake_fd: RawFd) {
    let mut buf = [0u8; 64];
    while let Ok(n) = sys::read(wake_fd, &mut buf) {
        if n < buf.len() {
            break;
        }
    }
}
