//! Error types for the filament scheduler

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors reported by scheduler and fiber construction.
///
/// These are the recoverable resource errors: the caller decides whether to
/// retry or give up. Contract violations (resuming a completed fiber,
/// destroying a joinable scheduler, popping an empty ready pool) are not
/// represented here; they abort the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Construction parameters failed validation
    InvalidConfig(&'static str),

    /// Stack mmap/mprotect failed for the requested size
    StackAllocation { size: usize },

    /// Spawning an OS thread (kernel thread or poller) failed
    ThreadSpawn,

    /// Creating the poller's wake pipe failed
    WakePipe(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            SchedError::StackAllocation { size } => {
                write!(f, "failed to allocate {} byte fiber stack", size)
            }
            SchedError::ThreadSpawn => write!(f, "failed to spawn OS thread"),
            SchedError::WakePipe(errno) => write!(f, "failed to create wake pipe: errno {}", errno),
        }
    }
}

impl std::error::Error for SchedError {}

/// Errors reported through a [`Task`](crate::task::Task).
///
/// These are contained, per-fiber outcomes; they never affect other fibers
/// or the scheduler itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The fiber's closure panicked; the payload message is captured
    Panicked(String),

    /// `get` was called a second time on the same task
    AlreadyRetrieved,

    /// The producing side was dropped without ever delivering a result
    /// (e.g. the fiber was torn down before running)
    Abandoned,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Panicked(msg) => write!(f, "fiber panicked: {}", msg),
            TaskError::AlreadyRetrieved => write!(f, "task result already retrieved"),
            TaskError::Abandoned => write!(f, "task abandoned without a result"),
        }
    }
}

impl std::error::Error for TaskError {}
