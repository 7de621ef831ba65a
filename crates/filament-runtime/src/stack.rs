//! Fiber stack memory
//!
//! Each fiber exclusively owns one mmap'd region: a guard page at the low
//! end (left PROT_NONE so overflow faults instead of corrupting a
//! neighbour) and the usable stack above it. The region is unmapped when
//! the owning `FiberStack` is dropped, and the type is move-only, so the
//! memory cannot be referenced after free.

use filament_core::error::{SchedError, SchedResult};

/// Minimum usable stack, below which even the entry trampoline would be
/// at risk.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Exclusively-owned, guard-paged fiber stack.
pub struct FiberStack {
    base: *mut u8,
    total_size: usize,
    guard_size: usize,
}

// The raw base pointer refers to memory only this value can reach.
unsafe impl Send for FiberStack {}

impl FiberStack {
    /// Map a stack with `size` usable bytes (rounded up to whole pages).
    pub fn allocate(size: usize) -> SchedResult<FiberStack> {
        let page = page_size();
        let usable = round_up(size.max(MIN_STACK_SIZE), page);
        let guard = page;
        let total = usable + guard;

        // Reserve the whole region inaccessible, then open up everything
        // above the guard page.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(SchedError::StackAllocation { size });
        }

        let ret = unsafe {
            libc::mprotect(
                (base as *mut u8).add(guard) as *mut libc::c_void,
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if ret != 0 {
            unsafe {
                libc::munmap(base, total);
            }
            return Err(SchedError::StackAllocation { size });
        }

        Ok(FiberStack {
            base: base as *mut u8,
            total_size: total,
            guard_size: guard,
        })
    }

    /// High end of the stack; execution starts here and grows down toward
    /// the guard page.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // SAFETY: base..base+total_size is the mapped region.
        unsafe { self.base.add(self.total_size) }
    }

    /// Usable bytes between the guard page and the top.
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.total_size - self.guard_size
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // SAFETY: we mapped exactly this region in allocate().
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_write() {
        let stack = FiberStack::allocate(64 * 1024).unwrap();
        assert!(stack.usable_size() >= 64 * 1024);

        // The usable region below the top is writable.
        unsafe {
            let p = stack.top().sub(8);
            p.write(0xAB);
            assert_eq!(p.read(), 0xAB);
        }
    }

    #[test]
    fn test_minimum_is_enforced() {
        let stack = FiberStack::allocate(1).unwrap();
        assert!(stack.usable_size() >= MIN_STACK_SIZE);
    }

    #[test]
    fn test_top_is_aligned_to_pages() {
        let stack = FiberStack::allocate(32 * 1024).unwrap();
        assert_eq!(stack.top() as usize % 4096, 0);
    }
}
