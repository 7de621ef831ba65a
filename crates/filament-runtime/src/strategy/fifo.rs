//! FIFO scheduling strategy

use super::{ReadyPool, SchedulingStrategy};
use crate::fatal;
use crate::fiber::Fiber;

/// First in, first out: fibers are resumed in the order they most recently
/// became ready.
pub struct Fifo;

impl SchedulingStrategy for Fifo {
    fn pop_ready(&self, pool: &mut ReadyPool) -> Fiber {
        match pool.pop_front() {
            Some(fiber) => fiber,
            None => fatal!("pop_ready on an empty ready pool"),
        }
    }

    fn push_ready(&self, pool: &mut ReadyPool, fiber: Fiber) {
        if fiber.is_complete() {
            fatal!("push_ready of a completed fiber");
        }
        pool.push_back(fiber);
    }
}
