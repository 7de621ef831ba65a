//! The stackful fiber
//!
//! A `Fiber` is a suspendable unit of execution owning its stack. It is a
//! move-only value: at any instant it lives in exactly one place (the ready
//! pool, one kernel thread's dispatch frame, or the poller table), which is
//! what makes "no two threads ever resume the same fiber" hold statically.
//!
//! Construction performs one priming switch into the entry trampoline and
//! back, leaving the fiber `Suspended` before any user code has run; the
//! first real `resume` is then indistinguishable from any later one.
//!
//! Teardown of a suspended fiber resumes it one final time with a
//! never-execute-body signal: a fiber that never ran just drops its entry
//! closure, while a fiber suspended mid-body is unwound with a marker panic
//! ([`ForcedUnwind`]) raised at its suspension point and caught at the
//! trampoline, so destructors on the fiber stack still run. The marker
//! never crosses the stack-switch boundary.

use std::panic::{self, AssertUnwindSafe};

use filament_core::state::FiberState;
use filament_core::SchedResult;

use crate::arch::{self, SavedRegs};
use crate::fatal;
use crate::io::PendingIo;
use crate::stack::FiberStack;

/// Panic payload used to unwind a suspended fiber's stack during teardown.
pub(crate) struct ForcedUnwind;

/// Heap-pinned fiber state.
///
/// Lives in a `Box` so the saved register files and the pointer staged into
/// the trampoline stay valid while the owning `Fiber` value moves between
/// pool, kernel threads and poller.
pub(crate) struct FiberInner {
    /// The fiber's saved execution point while suspended
    regs: SavedRegs,
    /// The resumer's saved execution point while the fiber runs
    link: SavedRegs,
    state: FiberState,
    stack: FiberStack,
    entry: Option<Box<dyn FnOnce() + Send + 'static>>,
    pending_io: Option<PendingIo>,
    /// Teardown signal: when set, the next wake-up unwinds instead of
    /// continuing the body
    unwind: bool,
}

/// A suspendable unit of execution with its own stack.
pub struct Fiber {
    inner: Box<FiberInner>,
}

impl Fiber {
    /// Create a fiber that will run `entry` once resumed.
    ///
    /// Allocates a guard-paged stack of `stack_size` usable bytes and
    /// performs the priming switch; on return the fiber is `Suspended` and
    /// `entry` has not executed. Stack allocation failure is reported as a
    /// recoverable error.
    pub fn create<F>(entry: F, stack_size: usize) -> SchedResult<Fiber>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = FiberStack::allocate(stack_size)?;
        let mut inner = Box::new(FiberInner {
            regs: SavedRegs::zeroed(),
            link: SavedRegs::zeroed(),
            state: FiberState::Created,
            stack,
            entry: Some(Box::new(entry)),
            pending_io: None,
            unwind: false,
        });

        let ptr: *mut FiberInner = &mut *inner;
        // SAFETY: ptr is a live heap allocation; the stack was just mapped.
        // The priming switch runs the trampoline only as far as its initial
        // suspend, so no user code executes here.
        unsafe {
            arch::init_context(
                &mut (*ptr).regs,
                (*ptr).stack.top(),
                fiber_entry as usize,
                ptr as usize,
            );
            arch::switch_context(&mut (*ptr).link, &(*ptr).regs);
        }
        debug_assert_eq!(inner.state, FiberState::Suspended);

        Ok(Fiber { inner })
    }

    /// Switch the calling kernel thread into the fiber.
    ///
    /// Returns when the fiber next suspends or completes. The fiber must be
    /// `Suspended`; resuming a completed fiber is a contract violation and
    /// aborts.
    pub fn resume(&mut self) {
        let ptr: *mut FiberInner = &mut *self.inner;
        // SAFETY: exclusive ownership; only this thread touches the fiber
        // until the switch hands control back.
        unsafe {
            if !(*ptr).state.is_resumable() {
                fatal!("resume on a {} fiber", (*ptr).state);
            }
            (*ptr).state = FiberState::Running;
            arch::switch_context(&mut (*ptr).link, &(*ptr).regs);
        }
    }

    /// Has the entry closure finished (or the stack been unwound)?
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.inner.state.is_complete()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> FiberState {
        self.inner.state
    }

    /// Detach the pending-I/O record left by a blocking-I/O wrapper, if
    /// the fiber suspended because of one.
    pub(crate) fn take_pending_io(&mut self) -> Option<PendingIo> {
        self.inner.pending_io.take()
    }

    /// Raw pointer for the current-fiber registry. Valid until the `Fiber`
    /// is dropped; dereferenced only from the kernel thread currently
    /// resuming this fiber.
    pub(crate) fn inner_ptr(&mut self) -> *mut FiberInner {
        &mut *self.inner
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        let ptr: *mut FiberInner = &mut *self.inner;
        // SAFETY: exclusive ownership; see resume().
        unsafe {
            match (*ptr).state {
                FiberState::Completed => {}
                FiberState::Suspended => {
                    // Final resume with the never-execute-body signal so
                    // the fiber stack unwinds and its destructors run.
                    (*ptr).unwind = true;
                    (*ptr).state = FiberState::Running;
                    arch::switch_context(&mut (*ptr).link, &(*ptr).regs);
                    if !(*ptr).state.is_complete() {
                        fatal!("fiber failed to unwind during teardown");
                    }
                }
                other => fatal!("dropping a {} fiber", other),
            }
        }
    }
}

/// Suspend the fiber `ptr`, which must be running on the calling thread.
///
/// Control returns to whoever resumed it; when the fiber is next resumed
/// this function returns — unless the resume was a teardown, in which case
/// it raises the forced-unwind marker instead.
///
/// # Safety
///
/// `ptr` must be the fiber currently running on this thread (i.e. obtained
/// from the current-fiber registry between a resume and its return).
pub(crate) unsafe fn suspend_current(ptr: *mut FiberInner) {
    debug_assert_eq!((*ptr).state, FiberState::Running);
    (*ptr).state = FiberState::Suspended;
    arch::switch_context(&mut (*ptr).regs, &(*ptr).link);
    if (*ptr).unwind {
        panic::resume_unwind(Box::new(ForcedUnwind));
    }
}

/// Record a pending-I/O descriptor and suspend. The dispatch loop detaches
/// the record and hands the fiber to the poller instead of requeueing it.
///
/// # Safety
///
/// Same contract as [`suspend_current`].
pub(crate) unsafe fn park_current_on_io(ptr: *mut FiberInner, io: PendingIo) {
    (*ptr).pending_io = Some(io);
    suspend_current(ptr);
}

/// Entry trampoline; first code executed on a new fiber stack.
///
/// Parks immediately (the priming suspend), then on the first real resume
/// runs the entry closure. Panics from the closure must not unwind across
/// the switch boundary: the teardown marker completes the fiber quietly,
/// anything else aborts. The scheduler's spawn wrapper catches user panics
/// before they ever reach this frame.
extern "C" fn fiber_entry(raw: usize) -> ! {
    let ptr = raw as *mut FiberInner;
    // SAFETY: raw was staged by create() and the FiberInner outlives the
    // fiber stack by construction.
    unsafe {
        (*ptr).state = FiberState::Suspended;
        arch::switch_context(&mut (*ptr).regs, &(*ptr).link);

        if (*ptr).unwind {
            // Torn down before ever running: release the closure unexecuted.
            drop((*ptr).entry.take());
        } else {
            let entry = match (*ptr).entry.take() {
                Some(f) => f,
                None => fatal!("fiber resumed without an entry closure"),
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || entry())) {
                if !payload.is::<ForcedUnwind>() {
                    fatal!("panic escaped a fiber entry closure");
                }
            }
        }

        (*ptr).state = FiberState::Completed;
        arch::switch_context(&mut (*ptr).regs, &(*ptr).link);
    }
    fatal!("completed fiber was resumed");
}
