//! Work manager: admission, dispatch and lifecycle of submitted work.

use crate::config::ManagerConfig;
use crate::context::ContextHandler;
use crate::dispatch::{notify_listener, Dispatch, DispatchJob, Pending};
use crate::submission::{StartedWork, Submission};
use crate::validator::ContractValidator;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use workman_core::{
    RejectReason, StartTimeout, SubmissionMode, SubmissionRecord, WorkError, WorkEvent,
    WorkEventKind, WorkId, WorkListener, WorkState,
};
use workman_execution::{PoolError, PoolStats, StopReport, WorkerPool};

/// Counters since the manager started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Submissions admitted to the pool
    pub accepted: u64,
    /// Submissions refused or dropped before start
    pub rejected: u64,
    /// Submissions whose start wait expired
    pub timed_out: u64,
    /// Items that began running
    pub started: u64,
    /// Items that finished successfully
    pub completed: u64,
    /// Items that finished with an error
    pub failed: u64,
    /// Items queued or running right now
    pub in_flight: usize,
    /// Worker pool view
    pub pool: PoolStats,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) accepted: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) started: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
}

struct Tracked {
    record: SubmissionRecord,
    item: usize,
    dispatch: Arc<Dispatch>,
}

#[derive(Default)]
struct Registry {
    records: HashMap<WorkId, Tracked>,
    items: HashSet<usize>,
}

/// State shared between the manager handle and in-flight dispatches.
pub(crate) struct Core {
    config: ManagerConfig,
    validator: ContractValidator,
    context_handler: Option<Arc<dyn ContextHandler>>,
    registry: Mutex<Registry>,
    pub(crate) counters: Counters,
    stopped: AtomicBool,
}

impl Core {
    pub(crate) fn context_handler(&self) -> Option<&dyn ContextHandler> {
        self.context_handler.as_deref()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn register(&self, dispatch: &Arc<Dispatch>) -> Result<(), RejectReason> {
        let mut registry = self.registry.lock();

        if self.is_stopped() {
            return Err(RejectReason::Stopped);
        }

        let item = dispatch.item_key();
        if !registry.items.insert(item) {
            return Err(RejectReason::AlreadyInFlight);
        }

        let mut record = SubmissionRecord::new(dispatch.id, dispatch.work.name(), dispatch.mode);
        record.transition(WorkState::Queued);
        registry.records.insert(
            dispatch.id,
            Tracked {
                record,
                item,
                dispatch: Arc::clone(dispatch),
            },
        );
        Ok(())
    }

    pub(crate) fn mark_running(&self, id: WorkId, worker: &str) {
        if let Some(tracked) = self.registry.lock().records.get_mut(&id) {
            tracked.record.transition(WorkState::Running);
            tracked.record.worker = Some(worker.to_string());
        }
    }

    pub(crate) fn finish(&self, id: WorkId, state: WorkState, error: Option<String>) {
        let mut registry = self.registry.lock();
        let Some(mut tracked) = registry.records.remove(&id) else {
            return;
        };
        registry.items.remove(&tracked.item);
        drop(registry);

        if !tracked.record.transition(state) {
            warn!(
                work_id = %id,
                from = ?tracked.record.state,
                to = ?state,
                "unexpected work state transition"
            );
        }
        tracked.record.error = error;
        debug!(
            work_id = %id,
            state = ?tracked.record.state,
            work = %tracked.record.work_name,
            "work finished"
        );
    }

    fn release(&self, id: WorkId) -> bool {
        let dispatch = {
            let mut registry = self.registry.lock();
            let Some(tracked) = registry.records.get_mut(&id) else {
                return false;
            };
            tracked.record.release_requested = true;
            Arc::clone(&tracked.dispatch)
        };
        dispatch.request_release();
        true
    }

    /// Close admission. Returns the in-flight dispatches on the first call.
    fn close(&self) -> Option<Vec<Arc<Dispatch>>> {
        let mut registry = self.registry.lock();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(
            registry
                .records
                .values_mut()
                .map(|tracked| {
                    tracked.record.release_requested = true;
                    Arc::clone(&tracked.dispatch)
                })
                .collect(),
        )
    }

    fn refuse(
        &self,
        id: WorkId,
        work: &str,
        reason: RejectReason,
        listener: Option<&dyn WorkListener>,
    ) -> WorkError {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        let err = WorkError::Rejected { id, reason };
        warn!(work_id = %id, work = %work, error = %err, "work refused");
        notify_listener(listener, &WorkEvent::new(WorkEventKind::Rejected, id).with_error(&err));
        err
    }
}

/// Builder for a [`WorkManager`] with optional collaborators.
pub struct WorkManagerBuilder {
    config: ManagerConfig,
    context_handler: Option<Arc<dyn ContextHandler>>,
}

impl WorkManagerBuilder {
    /// Install the handler that establishes execution context on workers.
    pub fn context_handler(mut self, handler: Arc<dyn ContextHandler>) -> Self {
        self.context_handler = Some(handler);
        self
    }

    /// Start the worker pool and the manager.
    pub fn build(self) -> Result<WorkManager, PoolError> {
        let pool = WorkerPool::start(self.config.pool.clone())?;
        let validator = ContractValidator::new(self.config.enforce_entry_point_contract);

        info!(
            enforce_contract = validator.is_enforcing(),
            default_start_timeout_ms = ?self.config.default_start_timeout_ms,
            context_handler = self.context_handler.is_some(),
            "work manager started"
        );

        Ok(WorkManager {
            core: Arc::new(Core {
                config: self.config,
                validator,
                context_handler: self.context_handler,
                registry: Mutex::new(Registry::default()),
                counters: Counters::default(),
                stopped: AtomicBool::new(false),
            }),
            pool,
        })
    }
}

/// Accepts work items and runs them on a worker pool.
///
/// Three submission modes differ only in how long the caller waits:
///
/// - [`do_work`](Self::do_work) until the item finished,
/// - [`start_work`](Self::start_work) until a worker began running it,
/// - [`schedule_work`](Self::schedule_work) only for admission.
///
/// Outcomes of `start_work` and `schedule_work` submissions reach the caller
/// through the [`WorkListener`] attached to the [`Submission`].
pub struct WorkManager {
    core: Arc<Core>,
    pool: WorkerPool,
}

impl WorkManager {
    /// Start a manager without a context handler.
    pub fn start(config: ManagerConfig) -> Result<Self, PoolError> {
        Self::builder(config).build()
    }

    /// Configure a manager before starting it.
    pub fn builder(config: ManagerConfig) -> WorkManagerBuilder {
        WorkManagerBuilder {
            config,
            context_handler: None,
        }
    }

    /// Run an item and block until it finished.
    pub fn do_work(&self, submission: impl Into<Submission>) -> Result<(), WorkError> {
        let pending = self.submit(submission.into(), SubmissionMode::Do)?;
        pending.wait_started()?;
        pending.wait_done()
    }

    /// Submit an item and block until a worker started running it.
    pub fn start_work(&self, submission: impl Into<Submission>) -> Result<StartedWork, WorkError> {
        let pending = self.submit(submission.into(), SubmissionMode::Start)?;
        let start_delay = pending.wait_started()?;
        Ok(StartedWork {
            id: pending.id(),
            start_delay,
        })
    }

    /// Submit an item and return once it is queued.
    pub fn schedule_work(&self, submission: impl Into<Submission>) -> Result<WorkId, WorkError> {
        let pending = self.submit(submission.into(), SubmissionMode::Schedule)?;
        Ok(pending.id())
    }

    fn submit(
        &self,
        submission: Submission,
        mode: SubmissionMode,
    ) -> Result<Pending, WorkError> {
        let core = &self.core;
        let id = WorkId::new();
        let start_timeout = submission
            .start_timeout
            .unwrap_or_else(|| core.config.default_start_timeout());
        let name = submission.work.name().to_string();

        if core.is_stopped() {
            return Err(core.refuse(
                id,
                &name,
                RejectReason::Stopped,
                submission.listener.as_deref(),
            ));
        }

        if let Err(violation) = core.validator.validate(submission.work.as_ref()) {
            return Err(core.refuse(
                id,
                &name,
                violation.into(),
                submission.listener.as_deref(),
            ));
        }

        let (dispatch, pending) =
            Dispatch::create(Arc::clone(core), id, mode, submission, start_timeout);

        if let Err(reason) = core.register(&dispatch) {
            return Err(core.refuse(id, &name, reason, dispatch.listener()));
        }

        core.counters.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(work_id = %id, work = %name, %mode, ?start_timeout, "work accepted");
        dispatch.emit(WorkEvent::new(WorkEventKind::Accepted, id));

        let job = Box::new(DispatchJob(Arc::clone(&dispatch)));
        let handed = match start_timeout {
            StartTimeout::Immediate => self.pool.execute_now(job),
            _ => self.pool.execute(job),
        };

        let Err(e) = handed else {
            return Ok(pending);
        };

        let fallback = match e {
            PoolError::NoIdleWorker => {
                dispatch.expire();
                RejectReason::AtCapacity
            }
            PoolError::Stopped => {
                dispatch.reject(RejectReason::Stopped);
                RejectReason::Stopped
            }
            PoolError::QueueFull { .. } => {
                dispatch.reject(RejectReason::AtCapacity);
                RejectReason::AtCapacity
            }
            other => {
                error!(work_id = %id, error = %other, "worker pool refused work");
                dispatch.reject(RejectReason::AtCapacity);
                RejectReason::AtCapacity
            }
        };

        Err(pending.into_refusal(fallback))
    }

    /// Ask an in-flight item to stop.
    ///
    /// Sets the item's release signal and calls its `release` hook (once) on
    /// the calling thread. Returns `false` if no item with this id is queued
    /// or running. The call never waits for the item to stop.
    pub fn release(&self, id: WorkId) -> bool {
        let found = self.core.release(id);
        if !found {
            debug!(work_id = %id, "release of unknown work ignored");
        }
        found
    }

    /// Stop the manager.
    ///
    /// Admission closes permanently, queued items are rejected with
    /// [`RejectReason::Stopped`] and running items are released. With
    /// `wait` the call blocks until running items returned; without it the
    /// call returns at once and items that ignore release keep their worker.
    /// Later calls only join workers a previous non-waiting call left behind.
    pub fn shutdown(&self, wait: bool) -> StopReport {
        if let Some(in_flight) = self.core.close() {
            info!(in_flight = in_flight.len(), wait, "shutting down work manager");
            for dispatch in &in_flight {
                // Queued items are dropped; only running ones get released.
                if !dispatch.reject(RejectReason::Stopped) {
                    dispatch.request_release();
                }
            }
        }
        self.pool.stop(wait)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    /// Snapshot of the records of queued and running items.
    pub fn in_flight(&self) -> Vec<SubmissionRecord> {
        let registry = self.core.registry.lock();
        let mut records: Vec<SubmissionRecord> = registry
            .records
            .values()
            .map(|tracked| tracked.record.clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Current counters.
    pub fn stats(&self) -> ManagerStats {
        let counters = &self.core.counters;
        ManagerStats {
            accepted: counters.accepted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            started: counters.started.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            in_flight: self.core.registry.lock().records.len(),
            pool: self.pool.stats(),
        }
    }

    /// The configuration the manager was started with.
    pub fn config(&self) -> &ManagerConfig {
        &self.core.config
    }
}

impl Drop for WorkManager {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.shutdown(false);
        }
    }
}

impl std::fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkManager")
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}
