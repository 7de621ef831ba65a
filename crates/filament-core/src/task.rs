//! One-shot result channel between a fiber and an observer
//!
//! A [`TaskPromise`] travels into the fiber's entry closure; the matching
//! [`Task`] stays with whoever called `spawn`. The promise is fulfilled
//! exactly once, with either the closure's return value or its captured
//! panic, and `Task::get` blocks the observer (an OS thread, not a kernel
//! thread of the scheduler) until that happens.
//!
//! Misuse at this boundary is reachable from arbitrary user code, so it is
//! reported as an error kind rather than aborting: a second `get` yields
//! [`TaskError::AlreadyRetrieved`], and a promise dropped without a result
//! yields [`TaskError::Abandoned`].

use std::sync::{Arc, Condvar, Mutex};

use crate::error::TaskError;

/// Outcome of the fiber as delivered to the observer
pub type TaskResult<T> = Result<T, TaskError>;

enum Slot<T> {
    /// Fiber still running (or not yet run)
    Pending,
    /// Result delivered, not yet retrieved
    Ready(TaskResult<T>),
    /// Result retrieved once already
    Retrieved,
    /// Promise dropped without delivering
    Abandoned,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

/// Observer half: blocks on the fiber's outcome.
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

/// Producer half: moved into the fiber's entry closure.
pub struct TaskPromise<T> {
    shared: Arc<Shared<T>>,
    delivered: bool,
}

/// Create a connected promise/task pair.
pub fn pair<T>() -> (TaskPromise<T>, Task<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        cond: Condvar::new(),
    });
    (
        TaskPromise {
            shared: Arc::clone(&shared),
            delivered: false,
        },
        Task { shared },
    )
}

impl<T> TaskPromise<T> {
    /// Deliver the closure's return value.
    pub fn fulfill(mut self, value: T) {
        self.deliver(Ok(value));
    }

    /// Deliver a captured failure (typically a propagated panic).
    pub fn fail(mut self, err: TaskError) {
        self.deliver(Err(err));
    }

    fn deliver(&mut self, result: TaskResult<T>) {
        let mut slot = self.shared.slot.lock().unwrap();
        debug_assert!(matches!(*slot, Slot::Pending));
        *slot = Slot::Ready(result);
        self.delivered = true;
        self.shared.cond.notify_all();
    }
}

impl<T> Drop for TaskPromise<T> {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        // Promise went away without a result: the fiber was torn down
        // before its closure ran. Unblock any waiting observer.
        let mut slot = self.shared.slot.lock().unwrap();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Abandoned;
            self.shared.cond.notify_all();
        }
    }
}

impl<T> Task<T> {
    /// Block until the fiber's outcome is available and return it.
    ///
    /// Blocks the calling OS thread only; never call it from inside a
    /// fiber running on the same scheduler.
    pub fn get(&self) -> TaskResult<T> {
        let mut slot = self.shared.slot.lock().unwrap();
        loop {
            match *slot {
                Slot::Pending => {
                    slot = self.shared.cond.wait(slot).unwrap();
                }
                Slot::Ready(_) => {
                    let result = std::mem::replace(&mut *slot, Slot::Retrieved);
                    match result {
                        Slot::Ready(r) => return r,
                        _ => unreachable!(),
                    }
                }
                Slot::Retrieved => return Err(TaskError::AlreadyRetrieved),
                Slot::Abandoned => return Err(TaskError::Abandoned),
            }
        }
    }

    /// Non-blocking probe: has the outcome been delivered?
    pub fn is_ready(&self) -> bool {
        let slot = self.shared.slot.lock().unwrap();
        !matches!(*slot, Slot::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fulfill_then_get() {
        let (promise, task) = pair::<u32>();
        promise.fulfill(42);
        assert!(task.is_ready());
        assert_eq!(task.get(), Ok(42));
    }

    #[test]
    fn test_get_blocks_until_fulfilled() {
        let (promise, task) = pair::<&'static str>();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.fulfill("done");
        });

        assert_eq!(task.get(), Ok("done"));
        producer.join().unwrap();
    }

    #[test]
    fn test_double_get_is_an_error() {
        let (promise, task) = pair::<u32>();
        promise.fulfill(7);
        assert_eq!(task.get(), Ok(7));
        assert_eq!(task.get(), Err(TaskError::AlreadyRetrieved));
    }

    #[test]
    fn test_abandoned_promise() {
        let (promise, task) = pair::<u32>();
        drop(promise);
        assert!(task.is_ready());
        assert_eq!(task.get(), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_failure_propagates() {
        let (promise, task) = pair::<u32>();
        promise.fail(TaskError::Panicked("boom".to_string()));
        assert_eq!(task.get(), Err(TaskError::Panicked("boom".to_string())));
    }
}
