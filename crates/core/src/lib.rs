//! Workman core data model.
//!
//! This crate defines the work item contract, the release signal, submission
//! records, lifecycle events and the error taxonomy shared by the worker pool
//! and the work manager.

#![warn(missing_docs)]

// Identity
mod id;

// Work contract
mod work;
mod release;

// Bookkeeping
mod record;
mod event;
mod error;

// Re-exports
pub use id::WorkId;
pub use work::{EntryPoint, EntryPoints, Locking, StartTimeout, Work};
pub use release::ReleaseSignal;
pub use record::{SubmissionMode, SubmissionRecord, WorkState};
pub use event::{notify, WorkEvent, WorkEventKind, WorkListener};
pub use error::{ContractViolation, ErrorCode, RejectReason, Result, WorkError};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
