//! Work lifecycle events and listeners.

use crate::error::WorkError;
use crate::id::WorkId;
use std::time::Duration;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkEventKind {
    /// The item passed validation and was queued
    Accepted,
    /// The item will never run
    Rejected,
    /// A worker began running the item
    Started,
    /// The item finished, successfully or not
    Completed,
}

impl std::fmt::Display for WorkEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkEventKind::Accepted => write!(f, "accepted"),
            WorkEventKind::Rejected => write!(f, "rejected"),
            WorkEventKind::Started => write!(f, "started"),
            WorkEventKind::Completed => write!(f, "completed"),
        }
    }
}

/// A lifecycle event delivered to a [`WorkListener`].
#[derive(Debug, Clone, Copy)]
pub struct WorkEvent<'a> {
    /// What happened
    pub kind: WorkEventKind,

    /// Submission id
    pub id: WorkId,

    /// Time between acceptance and start (set from `Started` on)
    pub start_delay: Option<Duration>,

    /// Failure, for `Rejected` events and failed completions
    pub error: Option<&'a WorkError>,
}

impl<'a> WorkEvent<'a> {
    /// Create an event without delay or error.
    pub fn new(kind: WorkEventKind, id: WorkId) -> Self {
        Self {
            kind,
            id,
            start_delay: None,
            error: None,
        }
    }

    /// Attach the start delay.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Attach an error.
    pub fn with_error(mut self, error: &'a WorkError) -> Self {
        self.error = Some(error);
        self
    }

    /// Whether this event reports a failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Receives lifecycle notifications for one submission.
///
/// Callbacks run on whichever thread performed the transition: the
/// submitter's thread for acceptance and most rejections, the worker
/// thread for start and completion. They should return quickly.
pub trait WorkListener: Send + Sync {
    /// The item was accepted.
    fn work_accepted(&self, _event: &WorkEvent<'_>) {}

    /// The item was rejected and will never run.
    fn work_rejected(&self, _event: &WorkEvent<'_>) {}

    /// The item started running.
    fn work_started(&self, _event: &WorkEvent<'_>) {}

    /// The item finished.
    fn work_completed(&self, _event: &WorkEvent<'_>) {}
}

/// Dispatch an event to the matching listener method.
pub fn notify(listener: &dyn WorkListener, event: &WorkEvent<'_>) {
    match event.kind {
        WorkEventKind::Accepted => listener.work_accepted(event),
        WorkEventKind::Rejected => listener.work_rejected(event),
        WorkEventKind::Started => listener.work_started(event),
        WorkEventKind::Completed => listener.work_completed(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(WorkEventKind, bool)>>,
    }

    impl WorkListener for Recorder {
        fn work_accepted(&self, event: &WorkEvent<'_>) {
            self.seen.lock().push((event.kind, event.is_failure()));
        }

        fn work_completed(&self, event: &WorkEvent<'_>) {
            self.seen.lock().push((event.kind, event.is_failure()));
        }
    }

    #[test]
    fn test_notify_routes_by_kind() {
        let recorder = Recorder::default();
        let id = WorkId::new();
        let err = WorkError::Completed {
            id,
            cause: anyhow::anyhow!("boom"),
        };

        notify(&recorder, &WorkEvent::new(WorkEventKind::Accepted, id));
        // Default no-op methods swallow these.
        notify(&recorder, &WorkEvent::new(WorkEventKind::Started, id));
        notify(&recorder, &WorkEvent::new(WorkEventKind::Rejected, id));
        notify(
            &recorder,
            &WorkEvent::new(WorkEventKind::Completed, id).with_error(&err),
        );

        let seen = recorder.seen.lock();
        assert_eq!(
            *seen,
            vec![
                (WorkEventKind::Accepted, false),
                (WorkEventKind::Completed, true)
            ]
        );
    }

    #[test]
    fn test_event_builder() {
        let event = WorkEvent::new(WorkEventKind::Started, WorkId::new())
            .with_start_delay(Duration::from_millis(5));
        assert_eq!(event.start_delay, Some(Duration::from_millis(5)));
        assert!(!event.is_failure());
    }
}
