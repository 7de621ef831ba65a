//! The M:N scheduler
//!
//! Owns a fixed set of kernel threads, the ready pool and the poller. Each
//! kernel thread runs the dispatch loop: wait for a ready fiber, resume it,
//! and route it on return — requeue on a plain yield, hand to the poller on
//! a pending-I/O suspend, drop on completion.
//!
//! All shared state lives behind one mutex + condition variable. The
//! condition variable is notified on every change that could unblock a
//! waiter; while a join is outstanding the notification is a broadcast,
//! because a single `notify_one` could wake a kernel thread instead of the
//! join waiter and the wake-up would be lost.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use filament_core::error::TaskError;
use filament_core::task::{self, Task};
use filament_core::{kdebug, SchedError, SchedResult};

use crate::config::SchedulerConfig;
use crate::current::CurrentGuard;
use crate::fatal;
use crate::fiber::Fiber;
use crate::poller::{self, PollerShared};
use crate::strategy::{Fifo, ReadyPool, SchedulingStrategy};

const ST_TERMINATE: u8 = 1 << 0;
const ST_JOIN: u8 = 1 << 1;

/// Mutex-guarded scheduler state.
pub(crate) struct SchedState {
    status: u8,
    /// Fibers currently resumed on some kernel thread
    runnings: usize,
    pub(crate) pool: ReadyPool,
}

impl SchedState {
    fn terminating(&self) -> bool {
        self.status & ST_TERMINATE != 0
    }

    fn join_requested(&self) -> bool {
        self.status & ST_JOIN != 0
    }
}

/// State shared by the public handle, the kernel threads and the poller
/// thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<SchedState>,
    pub(crate) cond: Condvar,
    strategy: Box<dyn SchedulingStrategy>,
    pub(crate) poller: Arc<PollerShared>,
}

impl Shared {
    /// Put a fiber the poller woke back into the ready pool.
    ///
    /// Runs on the poller thread. The pending count drops only after the
    /// fiber is in the pool, both under the mutex, so `joinable()` never
    /// observes the fiber in neither place.
    pub(crate) fn reinject(&self, fiber: Fiber) {
        let mut st = self.state.lock().unwrap();
        self.strategy.push_ready(&mut st.pool, fiber);
        self.poller.note_reinjected();
        if st.join_requested() {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }
}

/// The M:N cooperative scheduler.
///
/// Spawned fibers run on the scheduler's kernel threads until they yield,
/// park on I/O or complete. The scheduler must be drained (`join_all`)
/// before it is dropped; dropping a scheduler that still owns fibers is a
/// contract violation and aborts, mirroring the destruction of a joinable
/// thread handle.
pub struct Scheduler {
    shared: Arc<Shared>,
    kernels: HashMap<ThreadId, thread::JoinHandle<()>>,
    poller_thread: Option<thread::JoinHandle<()>>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler with the FIFO strategy.
    pub fn new(config: SchedulerConfig) -> SchedResult<Scheduler> {
        Self::with_strategy(config, Box::new(Fifo))
    }

    /// Create a scheduler with a custom ready-pool strategy.
    pub fn with_strategy(
        config: SchedulerConfig,
        strategy: Box<dyn SchedulingStrategy>,
    ) -> SchedResult<Scheduler> {
        config.validate().map_err(SchedError::InvalidConfig)?;

        let (poller_shared, wake_read) = PollerShared::new(config.poll_interval)?;
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedState {
                status: 0,
                runnings: 0,
                pool: ReadyPool::new(),
            }),
            cond: Condvar::new(),
            strategy,
            poller: Arc::clone(&poller_shared),
        });

        let poller_thread = thread::Builder::new()
            .name("filament-poller".to_string())
            .spawn({
                let poller = Arc::clone(&poller_shared);
                let sched = Arc::clone(&shared);
                move || poller::run(poller, wake_read, sched)
            })
            .map_err(|_| SchedError::ThreadSpawn)?;

        let mut scheduler = Scheduler {
            shared,
            kernels: HashMap::new(),
            poller_thread: Some(poller_thread),
            config,
        };

        for i in 0..scheduler.config.kernel_threads {
            let spawned = thread::Builder::new()
                .name(format!("filament-kernel-{}", i))
                .spawn({
                    let shared = Arc::clone(&scheduler.shared);
                    move || dispatch(shared)
                });
            match spawned {
                Ok(handle) => {
                    scheduler.kernels.insert(handle.thread().id(), handle);
                }
                // Dropping the half-built scheduler tears down whatever
                // already started; nothing has been spawned onto it yet.
                Err(_) => return Err(SchedError::ThreadSpawn),
            }
        }

        Ok(scheduler)
    }

    /// Spawn a fiber with the default stack size.
    ///
    /// Returns immediately; the returned [`Task`] completes when the
    /// closure returns (value) or panics (error).
    pub fn spawn<F, T>(&self, f: F) -> SchedResult<Task<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with_stack(self.config.stack_size, f)
    }

    /// Spawn a fiber with an explicit usable stack size.
    pub fn spawn_with_stack<F, T>(&self, stack_size: usize, f: F) -> SchedResult<Task<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, task) = task::pair();
        let body = move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => promise.fulfill(value),
            Err(payload) => promise.fail(TaskError::Panicked(panic_message(&*payload))),
        };

        let fiber = Fiber::create(body, stack_size)?;

        let mut st = self.shared.state.lock().unwrap();
        self.shared.strategy.push_ready(&mut st.pool, fiber);
        if st.join_requested() {
            self.shared.cond.notify_all();
        } else {
            self.shared.cond.notify_one();
        }
        Ok(task)
    }

    /// Block the calling thread until every fiber has completed.
    ///
    /// Call from an observer thread, never from inside a fiber of this
    /// scheduler. Postcondition: `!joinable()`.
    pub fn join_all(&self) {
        let mut st = self.shared.state.lock().unwrap();
        while joinable_locked(&st, &self.shared) {
            st.status |= ST_JOIN;
            st = self.shared.cond.wait(st).unwrap();
        }
        st.status &= !ST_JOIN;
    }

    /// Non-blocking snapshot: does the scheduler still own any fiber
    /// (ready, running, or parked on I/O)?
    pub fn joinable(&self) -> bool {
        let st = self.shared.state.lock().unwrap();
        joinable_locked(&st, &self.shared)
    }

    /// Number of kernel threads.
    pub fn kernel_size(&self) -> usize {
        self.kernels.len()
    }

    /// Number of fibers currently in the ready pool.
    pub fn user_size(&self) -> usize {
        self.shared.state.lock().unwrap().pool.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.joinable() {
            fatal!("scheduler dropped while joinable; call join_all() first");
        }

        {
            let mut st = self.shared.state.lock().unwrap();
            st.status |= ST_TERMINATE;
            self.shared.cond.notify_all();
        }
        self.shared.poller.request_shutdown();

        for (_, handle) in self.kernels.drain() {
            let _ = handle.join();
        }
        if let Some(handle) = self.poller_thread.take() {
            let _ = handle.join();
        }
    }
}

fn joinable_locked(st: &SchedState, shared: &Shared) -> bool {
    st.pool.len() != 0 || st.runnings != 0 || shared.poller.pending_count() != 0
}

/// Dispatch loop run by every kernel thread.
fn dispatch(shared: Arc<Shared>) {
    loop {
        let mut st = shared.state.lock().unwrap();
        while !st.terminating() && st.pool.is_empty() {
            st = shared.cond.wait(st).unwrap();
        }
        if st.terminating() {
            break;
        }

        let mut fiber = shared.strategy.pop_ready(&mut st.pool);
        st.runnings += 1;
        drop(st);

        {
            // Registered as current only for the duration of the resume;
            // the guard clears the entry on every exit path.
            let _current = CurrentGuard::new(&mut fiber);
            fiber.resume();
        }

        let mut st = shared.state.lock().unwrap();
        st.runnings -= 1;
        let mut requeued = false;
        if fiber.is_complete() {
            drop(fiber);
        } else if let Some(io) = fiber.take_pending_io() {
            // Parked on I/O: ownership moves to the poller table instead
            // of the pool.
            shared.poller.register(fiber, io);
        } else {
            shared.strategy.push_ready(&mut st.pool, fiber);
            requeued = true;
        }

        if st.join_requested() {
            shared.cond.notify_all();
        } else if requeued {
            shared.cond.notify_one();
        }
    }
    kdebug!("kernel thread exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(threads: usize) -> SchedulerConfig {
        SchedulerConfig::default()
            .kernel_threads(threads)
            .poll_interval(Duration::from_millis(5))
            .stack_size(64 * 1024)
    }

    #[test]
    fn test_zero_kernel_threads_is_a_resource_error() {
        match Scheduler::new(config(0)) {
            Err(SchedError::InvalidConfig(_)) => {}
            other => panic!("expected InvalidConfig, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_spawn_and_join_all() {
        let sched = Scheduler::new(config(2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let counter = Arc::clone(&counter);
                sched
                    .spawn(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap()
            })
            .collect();

        sched.join_all();
        assert!(!sched.joinable());
        assert_eq!(counter.load(Ordering::Relaxed), 50);
        for task in &tasks {
            assert_eq!(task.get(), Ok(()));
        }
    }

    #[test]
    fn test_results_are_delivered() {
        let sched = Scheduler::new(config(4)).unwrap();

        let tasks: Vec<_> = (0..10u64)
            .map(|i| sched.spawn(move || i * i).unwrap())
            .collect();

        sched.join_all();
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.get(), Ok((i * i) as u64));
        }
    }

    #[test]
    fn test_fifo_fairness_on_one_kernel_thread() {
        let sched = Arc::new(Scheduler::new(config(1)).unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Spawning from inside a fiber keeps the single kernel thread busy
        // until all three are queued, so the observed resume order is
        // exactly the spawn order, twice.
        {
            let sched2 = Arc::clone(&sched);
            let order2 = Arc::clone(&order);
            sched
                .spawn(move || {
                    for tag in ["a", "b", "c"] {
                        let order = Arc::clone(&order2);
                        sched2
                            .spawn(move || {
                                order.lock().unwrap().push(tag);
                                crate::current::yield_now();
                                order.lock().unwrap().push(tag);
                            })
                            .unwrap();
                    }
                })
                .unwrap();
        }

        sched.join_all();
        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_yielding_fibers_complete() {
        let sched = Scheduler::new(config(2)).unwrap();
        let hops = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let hops = Arc::clone(&hops);
                sched
                    .spawn(move || {
                        for _ in 0..100 {
                            hops.fetch_add(1, Ordering::Relaxed);
                            crate::current::yield_now();
                        }
                    })
                    .unwrap()
            })
            .collect();

        sched.join_all();
        assert_eq!(hops.load(Ordering::Relaxed), 800);
        for task in &tasks {
            assert_eq!(task.get(), Ok(()));
        }
    }

    #[test]
    fn test_panic_is_contained_to_its_task() {
        let sched = Scheduler::new(config(2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let bad = sched.spawn(|| panic!("boom")).unwrap();
        let good: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                sched
                    .spawn(move || {
                        crate::current::yield_now();
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap()
            })
            .collect();

        sched.join_all();

        match bad.get() {
            Err(TaskError::Panicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected a panicked task, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4);
        for task in &good {
            assert_eq!(task.get(), Ok(()));
        }

        // The scheduler keeps servicing fibers afterwards.
        let after = sched.spawn(|| 1 + 1).unwrap();
        sched.join_all();
        assert_eq!(after.get(), Ok(2));
    }

    #[test]
    fn test_introspection() {
        let sched = Scheduler::new(config(3)).unwrap();
        assert_eq!(sched.kernel_size(), 3);

        sched.join_all();
        assert_eq!(sched.user_size(), 0);
        assert!(!sched.joinable());
    }

    #[test]
    fn test_spawn_with_explicit_stack() {
        let sched = Scheduler::new(config(1)).unwrap();

        // A deliberately roomy stack for a recursion-happy fiber.
        let task = sched
            .spawn_with_stack(512 * 1024, || {
                fn depth(n: usize) -> usize {
                    if n == 0 {
                        0
                    } else {
                        1 + depth(n - 1)
                    }
                }
                depth(1000)
            })
            .unwrap();

        sched.join_all();
        assert_eq!(task.get(), Ok(1000));
    }

    #[test]
    fn test_join_all_is_idempotent() {
        let sched = Scheduler::new(config(2)).unwrap();
        sched.join_all();
        sched.join_all();
        assert!(!sched.joinable());
    }
}
