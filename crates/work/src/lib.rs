//! Work Management (Layer 2)
//!
//! Admission, dispatch and lifecycle of submitted work: the contract
//! validator, execution context setup and the [`WorkManager`] itself.

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod manager;
pub mod submission;
pub mod validator;

mod dispatch;

pub use config::{ConfigError, ManagerConfig};
pub use context::{ContextHandler, ExecutionContext};
pub use manager::{ManagerStats, WorkManager, WorkManagerBuilder};
pub use submission::{StartedWork, Submission};
pub use validator::ContractValidator;
