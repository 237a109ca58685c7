//! Cooperative release (cancellation) signal.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag through which the manager asks a running work item to stop.
///
/// The signal is level-triggered: once released it stays released and can be
/// observed any number of times. It never interrupts a thread; work has to
/// check [`is_released`](Self::is_released) (or block in
/// [`wait_timeout`](Self::wait_timeout)) and return from `run` on its own.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    released: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ReleaseSignal {
    /// Create a signal that has not been released.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether release has been requested.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Request release. Returns `true` only for the call that set the flag.
    pub fn release(&self) -> bool {
        let _guard = self.inner.lock.lock();
        let first = !self.inner.released.swap(true, Ordering::AcqRel);
        if first {
            self.inner.cond.notify_all();
        }
        first
    }

    /// Block until released or until `timeout` elapses.
    ///
    /// Returns `true` if the signal was released. A timeout too large to
    /// express as a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut guard = self.inner.lock.lock();
        while !self.is_released() {
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.is_released();
            }
        }
        true
    }

    /// Block until released.
    pub fn wait(&self) {
        let mut guard = self.inner.lock.lock();
        while !self.is_released() {
            self.inner.cond.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_release_is_set_once() {
        let signal = ReleaseSignal::new();
        assert!(!signal.is_released());
        assert!(signal.release());
        assert!(!signal.release());
        assert!(signal.is_released());
        // Level-triggered: still observable.
        assert!(signal.is_released());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = ReleaseSignal::new();
        let other = signal.clone();
        other.release();
        assert!(signal.is_released());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = ReleaseSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        let signal = ReleaseSignal::new();
        signal.release();
        assert!(signal.wait_timeout(Duration::MAX));

        let pending = ReleaseSignal::new();
        let remote = pending.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.release();
        });
        assert!(pending.wait_timeout(Duration::MAX));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_wakes_on_release_from_other_thread() {
        let signal = ReleaseSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.release();
        });
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        signal.wait();
        handle.join().unwrap();
    }
}
