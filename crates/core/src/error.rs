//! Error taxonomy for work submission.
//!
//! Callers must be able to tell "never ran" apart from "ran and failed":
//!
//! - [`WorkError::Rejected`]: the item never started (contract violation,
//!   pool at capacity, stopped manager, duplicate dispatch).
//! - [`WorkError::StartTimedOut`]: the bounded wait for a worker expired.
//! - [`WorkError::Completed`]: the item started and something between
//!   context setup and the end of `run` failed.

use crate::id::WorkId;
use crate::work::EntryPoint;
use std::time::Duration;

/// Error type for work submission.
pub type Result<T> = std::result::Result<T, WorkError>;

/// Errors surfaced to the submitter of a work item.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The item was not admitted, or was dropped before it started.
    #[error("work {id} rejected: {reason}")]
    Rejected {
        /// Submission id
        id: WorkId,
        /// Why it was rejected
        reason: RejectReason,
    },

    /// No worker began running the item within the start timeout.
    #[error("work {id} did not start within {}ms", .timeout.as_millis())]
    StartTimedOut {
        /// Submission id
        id: WorkId,
        /// The timeout that expired
        timeout: Duration,
    },

    /// The item started and failed. The message carries the full cause chain.
    #[error("work {id} completed with error: {cause:#}")]
    Completed {
        /// Submission id
        id: WorkId,
        /// Original failure
        #[source]
        cause: anyhow::Error,
    },
}

impl WorkError {
    /// Submission id the error refers to.
    pub fn id(&self) -> WorkId {
        match self {
            WorkError::Rejected { id, .. }
            | WorkError::StartTimedOut { id, .. }
            | WorkError::Completed { id, .. } => *id,
        }
    }

    /// Whether the work never started running.
    pub fn never_ran(&self) -> bool {
        !matches!(self, WorkError::Completed { .. })
    }

    /// Coarse error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkError::Rejected {
                reason: RejectReason::Stopped | RejectReason::AtCapacity,
                ..
            } => ErrorCode::Internal,
            WorkError::Rejected { .. } => ErrorCode::Undefined,
            WorkError::StartTimedOut { .. } => ErrorCode::StartTimedOut,
            WorkError::Completed { .. } => ErrorCode::Undefined,
        }
    }

    /// Reject reason, if this is a rejection.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            WorkError::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Why a submission was rejected before running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The item breaks the work contract
    #[error("{0}")]
    Contract(#[from] ContractViolation),

    /// No worker thread or queue slot is available
    #[error("worker pool is at capacity")]
    AtCapacity,

    /// The manager or its pool has been stopped
    #[error("work manager is stopped")]
    Stopped,

    /// The same item is still queued or running from an earlier submission
    #[error("work item is already in flight")]
    AlreadyInFlight,
}

/// A breach of the structural work contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// An entry point is declared as locked for its whole body
    #[error("`{entry}` must not be declared with whole-method locking")]
    SynchronizedEntryPoint {
        /// Offending entry point
        entry: EntryPoint,
    },
}

/// Error codes attached to work errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unspecified
    Undefined,
    /// Failure inside the manager itself
    Internal,
    /// The start timeout expired
    StartTimedOut,
}

impl ErrorCode {
    /// Numeric form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "-1",
            ErrorCode::Undefined => "0",
            ErrorCode::StartTimedOut => "1",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
