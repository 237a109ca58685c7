//! Worker pool sizing and queueing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pool::PoolError;

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Threads kept alive even when idle
    pub core_threads: usize,
    /// Upper bound on worker threads
    pub max_threads: usize,
    /// Jobs allowed to wait for a worker (None = unbounded)
    pub queue_capacity: Option<usize>,
    /// How long a surplus idle thread lingers before exiting
    pub keep_alive_ms: u64,
    /// Prefix for worker thread names
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_threads: 4,
            max_threads: 16,
            queue_capacity: None,
            keep_alive_ms: 60_000,
            thread_name: "workman-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the core thread count.
    pub fn with_core_threads(mut self, n: usize) -> Self {
        self.core_threads = n;
        self
    }

    /// Set the maximum thread count.
    pub fn with_max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// Bound the wait queue.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Let the wait queue grow without bound.
    pub fn with_unbounded_queue(mut self) -> Self {
        self.queue_capacity = None;
        self
    }

    /// Set the keep-alive for surplus idle threads.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = keep_alive.as_millis() as u64;
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Keep-alive as a duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Check the sizing is coherent.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_threads == 0 {
            return Err(PoolError::InvalidConfig(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.core_threads > self.max_threads {
            return Err(PoolError::InvalidConfig(format!(
                "core_threads ({}) exceeds max_threads ({})",
                self.core_threads, self.max_threads
            )));
        }
        if self.thread_name.is_empty() {
            return Err(PoolError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
