//! Database configuration.

use std::time::Duration;

/// Configuration for a database instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a lock request may wait before failing (`None` = wait until
    /// granted or chosen as a deadlock victim).
    pub lock_wait_timeout: Option<Duration>,

    /// Whether plain reads in locking mode take shared locks.
    pub shared_read_locks: bool,

    /// Run garbage collection automatically every this many commits (0 = never).
    pub gc_interval: u64,

    /// Retries allowed by `Database::transaction_with_retry` after the first attempt.
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_wait_timeout: None,
            shared_read_locks: true,
            gc_interval: 64,
            max_retries: 3,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn lock_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    /// Sets whether locking-mode reads take shared locks.
    #[must_use]
    pub const fn shared_read_locks(mut self, value: bool) -> Self {
        self.shared_read_locks = value;
        self
    }

    /// Sets the automatic garbage collection interval in commits.
    #[must_use]
    pub const fn gc_interval(mut self, commits: u64) -> Self {
        self.gc_interval = commits;
        self
    }

    /// Sets the retry budget for retryable transaction failures.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}
