//! Submission records - what the manager knows about in-flight work.

use crate::id::WorkId;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Which submission operation admitted the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Caller blocked until the work finished
    Do,
    /// Caller blocked until the work started
    Start,
    /// Caller returned once the work was queued
    Schedule,
}

impl std::fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionMode::Do => write!(f, "do"),
            SubmissionMode::Start => write!(f, "start"),
            SubmissionMode::Schedule => write!(f, "schedule"),
        }
    }
}

/// Lifecycle state of a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Passed validation, not yet handed to the pool
    Accepted,
    /// Waiting for a worker
    Queued,
    /// A worker is executing it
    Running,
    /// `run` returned successfully
    Completed,
    /// Setup or `run` failed
    Failed,
    /// Never started: dropped from the queue
    Rejected,
    /// Never started: the start timeout expired
    TimedOut,
}

impl WorkState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkState::Completed | WorkState::Failed | WorkState::Rejected | WorkState::TimedOut
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: WorkState) -> bool {
        use WorkState::*;
        matches!(
            (self, next),
            (Accepted, Queued)
                | (Queued, Running)
                | (Queued, Rejected)
                | (Queued, TimedOut)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

/// Correlates a submitted item with its mode, timing, worker and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Submission id
    pub id: WorkId,

    /// Work item name
    pub work_name: String,

    /// Submission mode
    pub mode: SubmissionMode,

    /// Current state
    pub state: WorkState,

    /// When the item was accepted
    pub accepted_at: Time,

    /// When a worker began running it
    pub started_at: Option<Time>,

    /// When it reached a terminal state
    pub completed_at: Option<Time>,

    /// Name of the worker thread running it
    pub worker: Option<String>,

    /// Whether release has been requested
    pub release_requested: bool,

    /// Failure message, for failed or rejected items
    pub error: Option<String>,
}

impl SubmissionRecord {
    /// Create a record for a freshly accepted item.
    pub fn new(id: WorkId, work_name: impl Into<String>, mode: SubmissionMode) -> Self {
        Self {
            id,
            work_name: work_name.into(),
            mode,
            state: WorkState::Accepted,
            accepted_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            worker: None,
            release_requested: false,
            error: None,
        }
    }

    /// Move to `next`, stamping times. Illegal transitions are ignored and
    /// reported as `false`.
    pub fn transition(&mut self, next: WorkState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        let now = chrono::Utc::now();
        match next {
            WorkState::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.state = next;
        true
    }

    /// Time between acceptance and start, once started.
    pub fn start_delay(&self) -> Option<chrono::Duration> {
        self.started_at.map(|t| t - self.accepted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut record = SubmissionRecord::new(WorkId::new(), "w", SubmissionMode::Do);
        assert_eq!(record.state, WorkState::Accepted);
        assert!(record.transition(WorkState::Queued));
        assert!(record.start_delay().is_none());
        assert!(record.transition(WorkState::Running));
        assert!(record.started_at.is_some());
        assert!(record.start_delay().is_some());
        assert!(record.transition(WorkState::Completed));
        assert!(record.completed_at.is_some());
        assert!(record.state.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_refused() {
        let mut record = SubmissionRecord::new(WorkId::new(), "w", SubmissionMode::Schedule);
        assert!(!record.transition(WorkState::Running));
        // Refusals happen before a record exists.
        assert!(!record.transition(WorkState::Rejected));
        assert!(record.transition(WorkState::Queued));
        assert!(record.transition(WorkState::TimedOut));
        // Terminal: nothing leaves it.
        assert!(!record.transition(WorkState::Running));
        assert!(!record.transition(WorkState::Completed));
        assert_eq!(record.state, WorkState::TimedOut);
    }

    #[test]
    fn test_record_serializes() {
        let record = SubmissionRecord::new(WorkId::new(), "job", SubmissionMode::Start);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mode"], "start");
        assert_eq!(json["state"], "accepted");
        assert_eq!(json["work_name"], "job");
    }
}
