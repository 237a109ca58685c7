//! Units the pool executes.

/// A job handed to the worker pool.
///
/// Exactly one of `execute` or `cancel` is called for every job the pool
/// accepted: `execute` on a worker thread, or `cancel` when the pool is
/// stopped while the job is still queued.
pub trait Job: Send + 'static {
    /// Run the job on a worker thread.
    fn execute(self: Box<Self>);

    /// The pool stopped before the job started.
    fn cancel(self: Box<Self>) {}
}

impl<F> Job for F
where
    F: FnOnce() + Send + 'static,
{
    fn execute(self: Box<Self>) {
        (*self)()
    }
}
