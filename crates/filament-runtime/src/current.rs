//! Current-fiber registry
//!
//! Process-wide table mapping each kernel thread to the fiber it is
//! presently running, so library code invoked deep inside a fiber (the
//! blocking-I/O wrappers, `yield_now`) can find "itself" without a handle
//! being threaded through every call.
//!
//! The table is written only by the scheduler, via an RAII guard wrapped
//! around each resume so that early-exit paths clear the entry too.
//! Distinct kernel threads touch distinct keys, so the `RwLock` only ever
//! contends on table growth.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::thread::{self, ThreadId};

use crate::fiber::{self, Fiber, FiberInner};
use crate::io::PendingIo;

fn registry() -> &'static RwLock<HashMap<ThreadId, usize>> {
    static REGISTRY: OnceLock<RwLock<HashMap<ThreadId, usize>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers `fiber` as current for the calling thread; clears on drop.
pub(crate) struct CurrentGuard {
    thread: ThreadId,
}

impl CurrentGuard {
    pub(crate) fn new(fiber: &mut Fiber) -> CurrentGuard {
        let thread = thread::current().id();
        let ptr = fiber.inner_ptr() as usize;
        registry().write().unwrap().insert(thread, ptr);
        CurrentGuard { thread }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        registry().write().unwrap().remove(&self.thread);
    }
}

/// Borrowed pointer to the fiber running on this thread, if any.
///
/// The read guard is released before returning, so the caller may suspend
/// through the pointer without holding the table lock.
fn current_ptr() -> Option<*mut FiberInner> {
    let map = registry().read().unwrap();
    map.get(&thread::current().id())
        .map(|p| *p as *mut FiberInner)
}

/// Is the calling thread currently executing a fiber?
pub fn in_fiber() -> bool {
    current_ptr().is_some()
}

/// Yield execution to another ready fiber.
///
/// No-op when called outside any fiber.
pub fn yield_now() {
    if let Some(ptr) = current_ptr() {
        // SAFETY: the registry entry exists exactly while this thread is
        // inside the fiber's resume, which is the suspend contract.
        unsafe { fiber::suspend_current(ptr) }
    }
}

/// Record a pending-I/O descriptor on the current fiber and suspend until
/// the poller hands it back.
///
/// No-op when called outside any fiber (the I/O wrappers only call this
/// from fiber context).
pub(crate) fn park_on_io(io: PendingIo) {
    if let Some(ptr) = current_ptr() {
        // SAFETY: as in yield_now().
        unsafe { fiber::park_current_on_io(ptr, io) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_current_outside_fiber() {
        assert!(!in_fiber());
        // Must not hang or crash
        yield_now();
        assert!(!in_fiber());
    }

    #[test]
    fn test_guard_sets_and_clears() {
        let mut fiber = Fiber::create(|| {}, 64 * 1024).unwrap();

        assert!(!in_fiber());
        {
            let _guard = CurrentGuard::new(&mut fiber);
            assert!(in_fiber());
        }
        assert!(!in_fiber());

        fiber.resume();
    }

    #[test]
    fn test_registry_is_per_thread() {
        let mut fiber = Fiber::create(|| {}, 64 * 1024).unwrap();
        let _guard = CurrentGuard::new(&mut fiber);
        assert!(in_fiber());

        std::thread::spawn(|| {
            assert!(!in_fiber());
        })
        .join()
        .unwrap();

        drop(_guard);
        fiber.resume();
    }
}
