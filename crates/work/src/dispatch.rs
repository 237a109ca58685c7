//! One submission on its way through the worker pool.
//!
//! A [`Dispatch`] is shared between the submitting thread, the worker that
//! runs it and the manager registry. Its atomic state decides who reports the
//! outcome when a start deadline races with a worker picking the item up:
//!
//! ```text
//! QUEUED -> RUNNING -> FINISHED
//!        -> TIMED_OUT           (start deadline passed)
//!        -> CANCELLED           (pool refused or dropped the job)
//! ```
//!
//! Only the side that moves the state out of `QUEUED` sends on the start
//! channel, so the submitter sees exactly one start result.

use crate::context::ExecutionContext;
use crate::manager::Core;
use crate::submission::Submission;
use anyhow::{anyhow, Context as _};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, warn};
use workman_core::{
    notify, RejectReason, ReleaseSignal, StartTimeout, SubmissionMode, Work, WorkError,
    WorkEvent, WorkEventKind, WorkId, WorkListener, WorkState,
};
use workman_execution::Job;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const TIMED_OUT: u8 = 3;
const CANCELLED: u8 = 4;

type StartResult = Result<Duration, WorkError>;
type DoneResult = Result<(), WorkError>;

pub(crate) struct Dispatch {
    pub(crate) id: WorkId,
    pub(crate) work: Arc<dyn Work>,
    pub(crate) mode: SubmissionMode,
    start_timeout: StartTimeout,
    context: Option<ExecutionContext>,
    listener: Option<Arc<dyn WorkListener>>,
    signal: ReleaseSignal,
    accepted: Instant,
    state: AtomicU8,
    started_tx: Sender<StartResult>,
    done_tx: Sender<DoneResult>,
    core: Arc<Core>,
}

impl Dispatch {
    pub(crate) fn create(
        core: Arc<Core>,
        id: WorkId,
        mode: SubmissionMode,
        submission: Submission,
        start_timeout: StartTimeout,
    ) -> (Arc<Self>, Pending) {
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let dispatch = Arc::new(Self {
            id,
            work: submission.work,
            mode,
            start_timeout,
            context: submission.context,
            listener: submission.listener,
            signal: ReleaseSignal::new(),
            accepted: Instant::now(),
            state: AtomicU8::new(QUEUED),
            started_tx,
            done_tx,
            core,
        });

        let pending = Pending {
            dispatch: Arc::clone(&dispatch),
            started: started_rx,
            done: done_rx,
        };

        (dispatch, pending)
    }

    /// Identity of the submitted item, used to refuse duplicate dispatch.
    pub(crate) fn item_key(&self) -> usize {
        Arc::as_ptr(&self.work) as *const () as usize
    }

    pub(crate) fn listener(&self) -> Option<&dyn WorkListener> {
        self.listener.as_deref()
    }

    pub(crate) fn emit(&self, event: WorkEvent<'_>) {
        notify_listener(self.listener(), &event);
    }

    fn claim(&self, next: u8) -> bool {
        self.state
            .compare_exchange(QUEUED, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Worker side.
    fn run(&self) {
        if let StartTimeout::Within(limit) = self.start_timeout {
            if self.accepted.elapsed() > limit {
                self.expire();
                return;
            }
        }

        if !self.claim(RUNNING) {
            return;
        }

        let delay = self.accepted.elapsed();
        let worker = thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        self.core.mark_running(self.id, &worker);
        self.core.counters.started.fetch_add(1, Ordering::Relaxed);
        debug!(
            work_id = %self.id,
            worker = %worker,
            delay_ms = delay.as_millis() as u64,
            "work started"
        );
        self.emit(WorkEvent::new(WorkEventKind::Started, self.id).with_start_delay(delay));
        let _ = self.started_tx.send(Ok(delay));

        let span = info_span!(
            "work",
            work_id = %self.id,
            name = self.work.name(),
            mode = %self.mode
        );
        let outcome = span.in_scope(|| self.execute());
        self.state.store(FINISHED, Ordering::Release);

        match outcome {
            Ok(()) => {
                self.core.finish(self.id, WorkState::Completed, None);
                self.core.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(work_id = %self.id, "work completed");
                self.emit(
                    WorkEvent::new(WorkEventKind::Completed, self.id).with_start_delay(delay),
                );
                let _ = self.done_tx.send(Ok(()));
            }
            Err(cause) => {
                let err = WorkError::Completed { id: self.id, cause };
                warn!(work_id = %self.id, error = %err, "work failed");
                self.core
                    .finish(self.id, WorkState::Failed, Some(err.to_string()));
                self.core.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    WorkEvent::new(WorkEventKind::Completed, self.id)
                        .with_start_delay(delay)
                        .with_error(&err),
                );
                let _ = self.done_tx.send(Err(err));
            }
        }
    }

    /// Context setup, `run`, teardown. Panics become errors.
    fn execute(&self) -> anyhow::Result<()> {
        let context = self.context.as_ref();
        let handler = self.core.context_handler();

        if let Some(handler) = handler {
            guard(|| handler.setup(self.id, context)).context("execution context setup failed")?;
        }

        let result = guard(|| self.work.run(&self.signal));

        if let Some(handler) = handler {
            if let Err(e) = guard(|| handler.teardown(self.id, context)) {
                warn!(work_id = %self.id, error = %format!("{e:#}"), "execution context teardown failed");
            }
        }

        result
    }

    /// Give up waiting for a worker. Returns `false` if the item already
    /// started or was otherwise resolved.
    pub(crate) fn expire(&self) -> bool {
        if !self.claim(TIMED_OUT) {
            return false;
        }
        self.core.counters.timed_out.fetch_add(1, Ordering::Relaxed);
        let timeout = self.start_timeout.as_duration().unwrap_or_default();
        self.abort(
            WorkState::TimedOut,
            WorkError::StartTimedOut {
                id: self.id,
                timeout,
            },
        );
        true
    }

    /// Drop an accepted item that has not started.
    pub(crate) fn reject(&self, reason: RejectReason) -> bool {
        if !self.claim(CANCELLED) {
            return false;
        }
        self.core.counters.rejected.fetch_add(1, Ordering::Relaxed);
        self.abort(
            WorkState::Rejected,
            WorkError::Rejected {
                id: self.id,
                reason,
            },
        );
        true
    }

    fn abort(&self, state: WorkState, err: WorkError) {
        warn!(work_id = %self.id, error = %err, "work dropped before start");
        self.core.finish(self.id, state, Some(err.to_string()));
        self.emit(WorkEvent::new(WorkEventKind::Rejected, self.id).with_error(&err));
        let _ = self.started_tx.send(Err(err));
    }

    /// Set the release signal and call the item's hook, once.
    pub(crate) fn request_release(&self) -> bool {
        if !self.signal.release() {
            return false;
        }
        debug!(work_id = %self.id, "release requested");
        if panic::catch_unwind(AssertUnwindSafe(|| self.work.release())).is_err() {
            error!(work_id = %self.id, "release hook panicked");
        }
        true
    }
}

/// Submitter side of a dispatch.
pub(crate) struct Pending {
    dispatch: Arc<Dispatch>,
    started: Receiver<StartResult>,
    done: Receiver<DoneResult>,
}

impl Pending {
    pub(crate) fn id(&self) -> WorkId {
        self.dispatch.id
    }

    /// Block until the item started, honoring its start timeout.
    pub(crate) fn wait_started(&self) -> StartResult {
        let dispatch = &self.dispatch;

        if let StartTimeout::Within(limit) = dispatch.start_timeout {
            let remaining = limit.saturating_sub(dispatch.accepted.elapsed());
            match self.started.recv_timeout(remaining) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    // Loses only if a worker claimed it meanwhile.
                    dispatch.expire();
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.lost()),
            }
        }

        self.started.recv().unwrap_or_else(|_| Err(self.lost()))
    }

    /// Block until the item finished.
    pub(crate) fn wait_done(&self) -> DoneResult {
        self.done.recv().unwrap_or_else(|_| Err(self.lost()))
    }

    /// The start result recorded when the pool refused the job.
    pub(crate) fn into_refusal(self, fallback: RejectReason) -> WorkError {
        match self.started.try_recv() {
            Ok(Err(err)) => err,
            _ => WorkError::Rejected {
                id: self.dispatch.id,
                reason: fallback,
            },
        }
    }

    fn lost(&self) -> WorkError {
        WorkError::Rejected {
            id: self.dispatch.id,
            reason: RejectReason::Stopped,
        }
    }
}

/// The job the worker pool sees.
pub(crate) struct DispatchJob(pub(crate) Arc<Dispatch>);

impl Job for DispatchJob {
    fn execute(self: Box<Self>) {
        self.0.run();
    }

    fn cancel(self: Box<Self>) {
        self.0.reject(RejectReason::Stopped);
    }
}

/// Deliver `event`, containing listener panics.
pub(crate) fn notify_listener(listener: Option<&dyn WorkListener>, event: &WorkEvent<'_>) {
    let Some(listener) = listener else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| notify(listener, event))).is_err() {
        error!(work_id = %event.id, kind = %event.kind, "work listener panicked");
    }
}

fn guard<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_results_through() {
        assert_eq!(guard(|| Ok(7)).unwrap(), 7);
        let err = guard::<()>(|| Err(anyhow!("plain failure"))).unwrap_err();
        assert_eq!(err.to_string(), "plain failure");
    }

    #[test]
    fn test_guard_turns_panics_into_errors() {
        let err = guard::<()>(|| panic!("exploded")).unwrap_err();
        assert_eq!(err.to_string(), "panicked: exploded");

        let err = guard::<()>(|| panic!("{} parts", 2)).unwrap_err();
        assert_eq!(err.to_string(), "panicked: 2 parts");
    }

    #[test]
    fn test_missing_listener_is_fine() {
        notify_listener(None, &WorkEvent::new(WorkEventKind::Accepted, WorkId::new()));
    }

    #[test]
    fn test_listener_panic_is_contained() {
        struct Exploding;
        impl WorkListener for Exploding {
            fn work_accepted(&self, _event: &WorkEvent<'_>) {
                panic!("listener bug");
            }
        }

        notify_listener(
            Some(&Exploding),
            &WorkEvent::new(WorkEventKind::Accepted, WorkId::new()),
        );
    }
}
