//! Execution layer - the worker pool that runs submitted jobs.

#![warn(missing_docs)]

pub mod config;
pub mod job;
pub mod pool;

pub use config::PoolConfig;
pub use job::Job;
pub use pool::{PoolError, PoolStats, StopReport, WorkerPool};
