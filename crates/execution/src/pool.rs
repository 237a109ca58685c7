//! Worker pool: a set of reusable threads draining a FIFO job queue.

use crate::config::PoolConfig;
use crate::job::Job;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Errors that can occur when handing jobs to the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every worker is busy and the queue is at capacity
    #[error("worker queue is full ({capacity} jobs waiting)")]
    QueueFull {
        /// Configured capacity
        capacity: usize,
    },

    /// No worker can take the job right now
    #[error("no idle worker available")]
    NoIdleWorker,

    /// The pool no longer accepts jobs
    #[error("worker pool is stopped")]
    Stopped,

    /// A worker thread could not be created
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Sizing is incoherent
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live worker threads
    pub threads: usize,
    /// Workers waiting for a job
    pub idle: usize,
    /// Workers executing a job
    pub active: usize,
    /// Jobs waiting for a worker
    pub queued: usize,
    /// Jobs executed so far
    pub completed: u64,
    /// Jobs that panicked and took their worker down
    pub panicked: u64,
}

/// What a call to [`WorkerPool::stop`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Whether this call performed the shutdown (false on repeat calls)
    pub first: bool,
    /// Queued jobs that were cancelled
    pub cancelled: usize,
    /// Worker threads joined
    pub joined: usize,
    /// Running jobs left to finish on their own
    pub abandoned: usize,
}

struct State {
    queue: VecDeque<Box<dyn Job>>,
    threads: usize,
    idle: usize,
    active: usize,
    stopped: bool,
}

struct Shared {
    config: PoolConfig,
    state: Mutex<State>,
    work_ready: Condvar,
    terminated: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// A pool of worker threads.
///
/// Jobs go to an idle worker when there is one, otherwise the pool grows up
/// to `max_threads`, otherwise the job waits in a FIFO queue. Stopping the
/// pool is permanent: later submissions fail with [`PoolError::Stopped`].
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Validate `config` and spawn the core threads.
    pub fn start(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                threads: 0,
                idle: 0,
                active: 0,
                stopped: false,
            }),
            work_ready: Condvar::new(),
            terminated: Condvar::new(),
            handles: Mutex::new(Vec::new()),
            next_worker: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        {
            let mut st = shared.state.lock();
            for _ in 0..shared.config.core_threads {
                if let Err(e) = spawn_worker(&shared, &mut st) {
                    st.stopped = true;
                    shared.work_ready.notify_all();
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        info!(
            core_threads = shared.config.core_threads,
            max_threads = shared.config.max_threads,
            queue_capacity = ?shared.config.queue_capacity,
            "worker pool started"
        );

        Ok(Self { shared })
    }

    /// Hand a job to the pool, queueing it if every worker is busy.
    pub fn execute(&self, job: Box<dyn Job>) -> Result<(), PoolError> {
        self.submit(job, false)
    }

    /// Hand a job to the pool only if a worker can take it right away.
    pub fn execute_now(&self, job: Box<dyn Job>) -> Result<(), PoolError> {
        self.submit(job, true)
    }

    fn submit(&self, job: Box<dyn Job>, immediate: bool) -> Result<(), PoolError> {
        let shared = &self.shared;
        let mut st = shared.state.lock();

        if st.stopped {
            return Err(PoolError::Stopped);
        }

        // Every queued job already has an idle worker on its way.
        if st.idle > st.queue.len() {
            st.queue.push_back(job);
            shared.work_ready.notify_one();
            return Ok(());
        }

        if st.threads < shared.config.max_threads {
            match spawn_worker(shared, &mut st) {
                Ok(()) => {
                    st.queue.push_back(job);
                    return Ok(());
                }
                Err(e) if st.threads == 0 => return Err(PoolError::Spawn(e)),
                Err(e) => warn!(error = %e, "could not grow worker pool"),
            }
        }

        if immediate {
            return Err(PoolError::NoIdleWorker);
        }

        if let Some(capacity) = shared.config.queue_capacity {
            if st.queue.len() >= capacity {
                return Err(PoolError::QueueFull { capacity });
            }
        }

        st.queue.push_back(job);
        debug!(queued = st.queue.len(), "all workers busy, job queued");
        Ok(())
    }

    /// Stop the pool.
    ///
    /// Admission closes and queued jobs are cancelled. With `wait` the call
    /// joins every worker, so it returns only once running jobs finished;
    /// without it the call returns at once and running jobs are left to
    /// finish (or hang) on their own. Calling `stop` again is harmless: it
    /// cancels nothing and only joins workers a previous call left behind.
    pub fn stop(&self, wait: bool) -> StopReport {
        let (first, drained, running) = {
            let mut st = self.shared.state.lock();
            let first = !st.stopped;
            st.stopped = true;
            let drained: Vec<Box<dyn Job>> = st.queue.drain(..).collect();
            self.shared.work_ready.notify_all();
            (first, drained, st.active)
        };

        let mut report = StopReport {
            first,
            cancelled: drained.len(),
            ..Default::default()
        };

        for job in drained {
            if panic::catch_unwind(AssertUnwindSafe(move || job.cancel())).is_err() {
                error!("job panicked while being cancelled");
            }
        }

        if wait {
            let handles = std::mem::take(&mut *self.shared.handles.lock());
            let current = thread::current().id();
            for handle in handles {
                if handle.thread().id() == current {
                    // Stopped from inside a job; this worker exits after it.
                    report.abandoned += 1;
                    continue;
                }
                if handle.join().is_err() {
                    error!("worker thread terminated abnormally");
                }
                report.joined += 1;
            }
        } else {
            report.abandoned = running;
        }

        if first {
            info!(
                wait,
                cancelled = report.cancelled,
                joined = report.joined,
                abandoned = report.abandoned,
                "worker pool stopped"
            );
        } else {
            debug!(wait, joined = report.joined, "worker pool already stopped");
        }

        report
    }

    /// Wait up to `timeout` for every worker thread to exit after a stop.
    ///
    /// Returns `true` if no worker is left.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut st = self.shared.state.lock();
        while st.threads > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .terminated
                        .wait_until(&mut st, deadline)
                        .timed_out()
                    {
                        return st.threads == 0;
                    }
                }
                None => self.shared.terminated.wait(&mut st),
            }
        }
        true
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let st = self.shared.state.lock();
        PoolStats {
            threads: st.threads,
            idle: st.idle,
            active: st.active,
            queued: st.queue.len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }

    /// The configuration the pool was started with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop(false);
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>, st: &mut State) -> std::io::Result<()> {
    let n = shared.next_worker.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", shared.config.thread_name, n);
    let worker = Arc::clone(shared);

    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(worker))?;

    st.threads += 1;
    let mut handles = shared.handles.lock();
    handles.retain(|h| !h.is_finished());
    handles.push(handle);

    debug!(worker = %name, threads = st.threads, "worker spawned");
    Ok(())
}

fn worker_loop(shared: Arc<Shared>) {
    let keep_alive = shared.config.keep_alive();
    let mut st = shared.state.lock();

    loop {
        if let Some(job) = st.queue.pop_front() {
            st.active += 1;
            let outcome = MutexGuard::unlocked(&mut st, || {
                panic::catch_unwind(AssertUnwindSafe(move || job.execute()))
            });
            st.active -= 1;
            shared.completed.fetch_add(1, Ordering::Relaxed);

            if outcome.is_err() {
                shared.panicked.fetch_add(1, Ordering::Relaxed);
                error!("job panicked, discarding worker");
                retire(&shared, &mut st);
                if !st.stopped && st.threads < shared.config.core_threads {
                    if let Err(e) = spawn_worker(&shared, &mut st) {
                        error!(error = %e, "could not replace worker");
                    }
                }
                return;
            }
            continue;
        }

        if st.stopped {
            break;
        }

        // Core workers wait without a deadline; only surplus ones time out.
        st.idle += 1;
        let timed_out = if st.threads > shared.config.core_threads {
            shared.work_ready.wait_for(&mut st, keep_alive).timed_out()
        } else {
            shared.work_ready.wait(&mut st);
            false
        };
        st.idle -= 1;

        if timed_out
            && st.queue.is_empty()
            && !st.stopped
            && st.threads > shared.config.core_threads
        {
            debug!("surplus worker idle past keep-alive, exiting");
            break;
        }
    }

    retire(&shared, &mut st);
}

fn retire(shared: &Shared, st: &mut State) {
    st.threads -= 1;
    shared.terminated.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn small(core: usize, max: usize) -> PoolConfig {
        PoolConfig::new()
            .with_core_threads(core)
            .with_max_threads(max)
            .with_thread_name("test-worker")
    }

    /// A job that blocks until the gate receives a message.
    fn gated(gate: Receiver<()>, started: Sender<()>) -> Box<dyn Job> {
        Box::new(move || {
            let _ = started.send(());
            let _ = gate.recv();
        })
    }

    struct Cancellable {
        cancelled: Sender<&'static str>,
    }

    impl Job for Cancellable {
        fn execute(self: Box<Self>) {
            let _ = self.cancelled.send("executed");
        }

        fn cancel(self: Box<Self>) {
            let _ = self.cancelled.send("cancelled");
        }
    }

    #[test]
    fn test_executes_jobs() {
        let pool = WorkerPool::start(small(2, 4)).unwrap();
        let (tx, rx) = unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        assert!(wait_until(Duration::from_secs(2), || pool.stats().completed == 10));
        pool.stop(true);
    }

    #[test]
    fn test_queue_is_fifo() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        let (gate_tx, gate_rx) = bounded(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute(gated(gate_rx, started_tx)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (tx, rx) = unbounded();
        for i in 0..5 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        assert_eq!(pool.stats().queued, 5);

        gate_tx.send(()).unwrap();
        let order: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        pool.stop(true);
    }

    #[test]
    fn test_queue_full() {
        let pool = WorkerPool::start(small(1, 1).with_queue_capacity(1)).unwrap();
        let (gate_tx, gate_rx) = bounded(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute(gated(gate_rx, started_tx)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.execute(Box::new(|| {})).unwrap();
        let err = pool.execute(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, PoolError::QueueFull { capacity: 1 }));

        gate_tx.send(()).unwrap();
        pool.stop(true);
    }

    #[test]
    fn test_execute_now_needs_idle_worker() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.stats().idle == 1));

        let (gate_tx, gate_rx) = bounded(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute_now(gated(gate_rx, started_tx)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let err = pool.execute_now(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, PoolError::NoIdleWorker));

        gate_tx.send(()).unwrap();
        pool.stop(true);
    }

    #[test]
    fn test_stop_cancels_queued_jobs() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        let (gate_tx, gate_rx) = bounded(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute(gated(gate_rx, started_tx)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (tx, rx) = unbounded();
        pool.execute(Box::new(Cancellable { cancelled: tx.clone() }))
            .unwrap();
        pool.execute(Box::new(Cancellable { cancelled: tx })).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gate_tx.send(()).unwrap();
        });
        let report = pool.stop(true);
        releaser.join().unwrap();

        assert!(report.first);
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.joined, 1);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["cancelled", "cancelled"]);
        assert_eq!(pool.stats().threads, 0);
    }

    #[test]
    fn test_stop_twice_is_harmless() {
        let pool = WorkerPool::start(small(2, 2)).unwrap();
        let first = pool.stop(true);
        let second = pool.stop(true);
        assert!(first.first);
        assert_eq!(first.joined, 2);
        assert!(!second.first);
        assert_eq!(second, StopReport::default());
    }

    #[test]
    fn test_stop_without_wait_abandons_running_job() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        let (gate_tx, gate_rx) = bounded(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute(gated(gate_rx, started_tx)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let begin = Instant::now();
        let report = pool.stop(false);
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(report.abandoned, 1);
        assert!(!pool.await_termination(Duration::from_millis(20)));

        gate_tx.send(()).unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));

        // A later waiting stop joins what the first one left behind.
        let again = pool.stop(true);
        assert!(!again.first);
        assert_eq!(again.joined, 1);
    }

    #[test]
    fn test_execute_after_stop_fails() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        pool.stop(true);
        assert!(pool.is_stopped());
        assert!(matches!(
            pool.execute(Box::new(|| {})),
            Err(PoolError::Stopped)
        ));
        assert!(matches!(
            pool.execute_now(Box::new(|| {})),
            Err(PoolError::Stopped)
        ));
    }

    #[test]
    fn test_panicking_job_replaces_worker() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.stats().panicked == 1));

        let (tx, rx) = bounded(1);
        pool.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.stats().threads == 1));
        pool.stop(true);
    }

    #[test]
    fn test_surplus_threads_retire() {
        let config = small(0, 2).with_keep_alive(Duration::from_millis(30));
        let pool = WorkerPool::start(config).unwrap();
        assert_eq!(pool.stats().threads, 0);

        let (tx, rx) = unbounded();
        for _ in 0..2 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        }
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || pool.stats().threads == 0));
        pool.stop(true);
    }

    #[test]
    fn test_zero_keep_alive_keeps_core_workers_parked() {
        let config = small(2, 3).with_keep_alive(Duration::ZERO);
        let pool = WorkerPool::start(config).unwrap();

        // Core workers park instead of cycling through expired waits.
        assert!(wait_until(Duration::from_secs(2), || pool.stats().idle == 2));
        thread::sleep(Duration::from_millis(50));
        let stats = pool.stats();
        assert_eq!(stats.threads, 2);
        assert_eq!(stats.idle, 2);

        let (tx, rx) = unbounded();
        for _ in 0..3 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        // The surplus worker retires at once, the core ones stay.
        assert!(wait_until(Duration::from_secs(5), || pool.stats().threads == 2));
        assert!(pool.stop(true).first);
        assert!(pool.await_termination(Duration::MAX));
    }

    #[test]
    fn test_worker_thread_names() {
        let pool = WorkerPool::start(small(1, 1)).unwrap();
        let (tx, rx) = bounded(1);
        pool.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-worker-"));
        pool.stop(true);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let err = WorkerPool::start(small(3, 1)).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }
}
