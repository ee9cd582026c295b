use crate::error::{Error, Result};
use core::time::Duration;

/// Default upper bound on how long a busy worker keeps draining after it has
/// been told to stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Default period of the worker safety sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Default name given to worker threads.
pub const DEFAULT_THREAD_NAME: &str = "kvpool-worker";

/// Sizing and lifecycle settings for a worker pool.
///
/// The pool size is fixed when the [`Master`](crate::Master) is built; the
/// remaining fields only affect shutdown and stall recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads in the rotation.
    pub worker_count: usize,
    /// How long a worker that is mid-drain may keep draining after a stop.
    /// Requests still queued afterwards stay in the shared queue.
    pub drain_timeout: Duration,
    /// How often an idle worker re-checks the request queue on its own, so a
    /// lost wake-up cannot strand a request. `None` disables the sweep.
    pub sweep_interval: Option<Duration>,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl PoolConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Option<Duration>) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Checks that the configuration describes a usable pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `worker_count` is zero or the sweep
    /// interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig {
                reason: "worker_count must be greater than 0".to_string(),
            });
        }
        if self.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::InvalidConfig {
                reason: "sweep_interval must be non-zero (use None to disable)".to_string(),
            });
        }
        Ok(())
    }
}
