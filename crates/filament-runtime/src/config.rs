//! Scheduler configuration

use std::time::Duration;

use filament_core::env::env_get;

/// Default usable stack per fiber.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Default bound on a single poller wait.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Configuration for [`Scheduler`](crate::scheduler::Scheduler).
///
/// Use `from_env()` to start from the defaults with environment overrides
/// applied, then adjust programmatically with the builder methods.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of kernel threads running the dispatch loop (must be > 0)
    pub kernel_threads: usize,
    /// Upper bound on a single poller wait; only affects how promptly the
    /// poller notices shutdown and fresh registrations, not I/O latency
    pub poll_interval: Duration,
    /// Usable stack bytes given to each fiber spawned without an explicit
    /// size
    pub stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SchedulerConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FIL_KERNEL_THREADS` - Number of kernel threads
    /// - `FIL_POLL_INTERVAL_MS` - Poller wait bound in milliseconds
    /// - `FIL_STACK_SIZE` - Default fiber stack size in bytes
    pub fn from_env() -> Self {
        let default_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            kernel_threads: env_get("FIL_KERNEL_THREADS", default_threads),
            poll_interval: Duration::from_millis(env_get(
                "FIL_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            stack_size: env_get("FIL_STACK_SIZE", DEFAULT_STACK_SIZE),
        }
    }

    /// Set the number of kernel threads
    pub fn kernel_threads(mut self, n: usize) -> Self {
        self.kernel_threads = n;
        self
    }

    /// Set the poller wait bound
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Set the default fiber stack size
    pub fn stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.kernel_threads == 0 {
            return Err("kernel_threads must be at least 1");
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.kernel_threads >= 1);
    }

    #[test]
    fn test_zero_kernel_threads_rejected() {
        let config = SchedulerConfig::default().kernel_threads(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = SchedulerConfig::default().poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let config = SchedulerConfig::default()
            .kernel_threads(3)
            .poll_interval(Duration::from_millis(5))
            .stack_size(64 * 1024);
        assert_eq!(config.kernel_threads, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.stack_size, 64 * 1024);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("FIL_KERNEL_THREADS", "2");
        let config = SchedulerConfig::from_env();
        assert_eq!(config.kernel_threads, 2);
        std::env::remove_var("FIL_KERNEL_THREADS");
    }
}
