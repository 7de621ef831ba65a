//! Fiber lifecycle state machine

use core::fmt;

/// State of a fiber
///
/// The only legal path is
/// `Created -> Suspended <-> Running -> Completed`; `Completed` is terminal.
/// The priming switch performed during construction moves a fiber from
/// `Created` to `Suspended` before any user code runs, so `Created` is
/// never observable outside `Fiber::create` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Being constructed; the priming switch has not finished yet
    Created = 0,

    /// Parked: in the ready pool, in the poller table, or freshly primed
    Suspended = 1,

    /// Executing on exactly one kernel thread
    Running = 2,

    /// Entry closure finished (or teardown unwound the stack); terminal
    Completed = 3,
}

impl FiberState {
    /// Check whether a fiber in this state may be resumed
    #[inline]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, FiberState::Suspended)
    }

    /// Check whether this fiber has finished for good
    #[inline]
    pub const fn is_complete(&self) -> bool {
        matches!(self, FiberState::Completed)
    }

    /// Check whether the transition `self -> next` is a legal one
    pub const fn can_transition(&self, next: FiberState) -> bool {
        matches!(
            (*self, next),
            (FiberState::Created, FiberState::Suspended)
                | (FiberState::Suspended, FiberState::Running)
                | (FiberState::Running, FiberState::Suspended)
                | (FiberState::Running, FiberState::Completed)
        )
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberState::Created => write!(f, "created"),
            FiberState::Suspended => write!(f, "suspended"),
            FiberState::Running => write!(f, "running"),
            FiberState::Completed => write!(f, "completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(FiberState::Suspended.is_resumable());
        assert!(!FiberState::Running.is_resumable());
        assert!(!FiberState::Completed.is_resumable());

        assert!(FiberState::Completed.is_complete());
        assert!(!FiberState::Suspended.is_complete());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(FiberState::Created.can_transition(FiberState::Suspended));
        assert!(FiberState::Suspended.can_transition(FiberState::Running));
        assert!(FiberState::Running.can_transition(FiberState::Suspended));
        assert!(FiberState::Running.can_transition(FiberState::Completed));
    }

    #[test]
    fn test_illegal_transitions() {
        // Completed is terminal
        assert!(!FiberState::Completed.can_transition(FiberState::Running));
        assert!(!FiberState::Completed.can_transition(FiberState::Suspended));
        // A fiber cannot skip the priming suspend
        assert!(!FiberState::Created.can_transition(FiberState::Running));
        // A suspended fiber cannot complete without running
        assert!(!FiberState::Suspended.can_transition(FiberState::Completed));
    }
}
