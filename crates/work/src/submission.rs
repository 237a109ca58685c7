//! Submission parameters and handles.

use crate::context::ExecutionContext;
use std::sync::Arc;
use std::time::Duration;
use workman_core::{StartTimeout, Work, WorkId, WorkListener};

/// A work item plus everything that travels with it.
///
/// ```
/// use std::sync::Arc;
/// use workman_core::{ReleaseSignal, StartTimeout, Work};
/// use workman_work::{ExecutionContext, Submission};
///
/// struct Noop;
///
/// impl Work for Noop {
///     fn run(&self, _signal: &ReleaseSignal) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// let submission = Submission::of(Noop)
///     .start_timeout(StartTimeout::Immediate)
///     .context(ExecutionContext::new().with_name("nightly"));
/// # let _ = submission;
/// ```
pub struct Submission {
    pub(crate) work: Arc<dyn Work>,
    pub(crate) start_timeout: Option<StartTimeout>,
    pub(crate) context: Option<ExecutionContext>,
    pub(crate) listener: Option<Arc<dyn WorkListener>>,
}

impl Submission {
    /// Submit a shared work item.
    pub fn new(work: Arc<dyn Work>) -> Self {
        Self {
            work,
            start_timeout: None,
            context: None,
            listener: None,
        }
    }

    /// Submit an owned work item.
    pub fn of<W: Work>(work: W) -> Self {
        Self::new(Arc::new(work))
    }

    /// Bound the wait for the item to start.
    pub fn start_timeout(mut self, timeout: StartTimeout) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    /// Attach an execution context.
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach a lifecycle listener.
    pub fn listener(mut self, listener: Arc<dyn WorkListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl<W: Work> From<Arc<W>> for Submission {
    fn from(work: Arc<W>) -> Self {
        Self::new(work)
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("work", &self.work.name())
            .field("start_timeout", &self.start_timeout)
            .field("context", &self.context)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Returned by `start_work` once a worker began running the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedWork {
    /// Submission id, usable with `WorkManager::release`
    pub id: WorkId,

    /// Time between acceptance and start
    pub start_delay: Duration,
}
