//! # filament - M:N Cooperative Fiber Scheduler
//!
//! A fixed pool of kernel threads executes a much larger, dynamically
//! growing set of lightweight, stackful, cooperatively-scheduled fibers.
//!
//! ## Features
//!
//! - **Stackful fibers**: each fiber owns an mmap'd, guard-paged stack;
//!   suspend/resume is a voluntary context switch via hand-written assembly
//! - **M:N dispatch**: N kernel threads drain one shared FIFO ready pool
//! - **Non-blocking I/O**: `read`/`write` wrappers park the fiber on a
//!   dedicated poller thread instead of stalling a kernel thread
//! - **Pluggable policy**: the ready-pool order is a two-operation trait;
//!   FIFO ships, others drop in
//! - **Task results**: every spawn returns a one-shot [`Task`] carrying the
//!   closure's value or its captured panic
//!
//! ## Quick Start
//!
//! ```ignore
//! use filament::{Scheduler, SchedulerConfig, yield_now};
//!
//! fn main() {
//!     let sched = Scheduler::new(SchedulerConfig::default()).unwrap();
//!
//!     let task = sched.spawn(|| {
//!         println!("hello from a fiber");
//!         yield_now();
//!         21 * 2
//!     }).unwrap();
//!
//!     sched.join_all();
//!     assert_eq!(task.get(), Ok(42));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │           spawn(), yield_now(), io::read/write              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │        ready pool + strategy, mutex/condvar protocol        │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Kernel   │      │  Kernel   │      │  Poller   │
//!    │  Thread   │      │  Thread   │      │  Thread   │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                       Fibers                            │
//!    │      guard-paged stacks, saved register files, mmap     │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use filament_core::{
    FiberState,
    SchedError,
    SchedResult,
    TaskError,
    Task,
};
pub use filament_core::task::TaskResult;

// Re-export kprint macros for debug logging
pub use filament_core::{kerror, kwarn, kinfo, kdebug, ktrace};
pub use filament_core::kprint::{LogLevel, init as init_logging, set_log_level};

// Re-export env utilities
pub use filament_core::{env_get, env_get_bool};

// Re-export runtime types
pub use filament_runtime::{
    Scheduler,
    SchedulerConfig,
    Fiber,
    Fifo,
    ReadyPool,
    SchedulingStrategy,
    in_fiber,
    yield_now,
};

/// Blocking-capable I/O wrappers; see [`io::read`] and [`io::write`].
pub mod io {
    pub use filament_runtime::io::{read, write, Interest};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn small_config(threads: usize) -> SchedulerConfig {
        SchedulerConfig::default()
            .kernel_threads(threads)
            .poll_interval(Duration::from_millis(5))
            .stack_size(64 * 1024)
    }

    #[test]
    fn test_end_to_end_smoke() {
        let sched = Scheduler::new(small_config(2)).unwrap();

        let task = sched
            .spawn(|| {
                yield_now();
                21 * 2
            })
            .unwrap();

        sched.join_all();
        assert!(!sched.joinable());
        assert_eq!(task.get(), Ok(42));
    }

    #[test]
    fn test_many_fibers_one_kernel_thread() {
        let sched = Scheduler::new(small_config(1)).unwrap();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..200 {
            let total = Arc::clone(&total);
            sched
                .spawn(move || {
                    yield_now();
                    total.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }

        sched.join_all();
        assert_eq!(total.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn test_pipe_round_trip_through_facade() {
        let sched = Scheduler::new(small_config(2)).unwrap();
        let (r, w) = nix::unistd::pipe().unwrap();
        let rfd = r.as_raw_fd();
        let wfd = w.as_raw_fd();

        let reader = sched
            .spawn(move || {
                let mut buf = [0u8; 16];
                let n = io::read(rfd, &mut buf).unwrap();
                buf[..n].to_vec()
            })
            .unwrap();
        let writer = sched
            .spawn(move || {
                yield_now();
                io::write(wfd, b"over the loom").unwrap()
            })
            .unwrap();

        sched.join_all();
        assert_eq!(writer.get(), Ok(13));
        assert_eq!(reader.get().unwrap(), b"over the loom");
    }

    #[test]
    fn test_panic_surfaces_through_task() {
        let sched = Scheduler::new(small_config(1)).unwrap();

        let bad = sched.spawn(|| panic!("woven wrong")).unwrap();
        let good = sched.spawn(|| "fine").unwrap();

        sched.join_all();
        match bad.get() {
            Err(TaskError::Panicked(msg)) => assert!(msg.contains("woven wrong")),
            other => panic!("expected a panicked task, got {:?}", other),
        }
        assert_eq!(good.get(), Ok("fine"));
    }

    #[test]
    fn test_yield_outside_fiber_is_noop() {
        assert!(!in_fiber());
        yield_now();
    }
}
