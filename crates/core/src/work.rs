//! The work item contract.

use crate::release::ReleaseSignal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A unit of work executed by the work manager on one of its worker threads.
///
/// `run` is invoked exactly once per accepted submission. `release` may be
/// invoked from another thread while `run` is still executing, which is why
/// work items must be `Sync` and keep any state they share between the two
/// behind their own fine-grained synchronization.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use workman_core::{ReleaseSignal, Work};
///
/// #[derive(Default)]
/// struct Flip {
///     ran: AtomicBool,
/// }
///
/// impl Work for Flip {
///     fn run(&self, _signal: &ReleaseSignal) -> anyhow::Result<()> {
///         self.ran.store(true, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
pub trait Work: Send + Sync + 'static {
    /// Perform the work.
    ///
    /// Long-running work should poll `signal` and return early once it is
    /// released. Any error (or panic) is reported to the submitter as a
    /// completed-with-error failure.
    fn run(&self, signal: &ReleaseSignal) -> anyhow::Result<()>;

    /// Hook invoked once when the manager asks this work to finish as soon
    /// as possible. The release signal passed to `run` is already set when
    /// this is called.
    fn release(&self) {}

    /// Structural declaration of how the entry points are synchronized.
    ///
    /// Work that locks the whole of `run` or `release` behind one object
    /// lock must say so here; the manager refuses to admit it.
    fn entry_points(&self) -> EntryPoints {
        EntryPoints::default()
    }

    /// Human-readable name used in logs and submission records.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// An entry point of a [`Work`] item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// `Work::run`
    Run,
    /// `Work::release`
    Release,
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPoint::Run => write!(f, "run"),
            EntryPoint::Release => write!(f, "release"),
        }
    }
}

/// How an entry point is guarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locking {
    /// No method-wide lock; the body may still lock internally.
    #[default]
    Unsynchronized,
    /// The entire method body runs under a single object-wide lock.
    WholeMethod,
}

/// Locking declarations for both entry points of a work item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoints {
    /// Declaration for `run`
    pub run: Locking,
    /// Declaration for `release`
    pub release: Locking,
}

impl EntryPoints {
    /// Both entry points unsynchronized.
    pub fn unsynchronized() -> Self {
        Self::default()
    }

    /// Both entry points locked as a whole.
    pub fn whole_method() -> Self {
        Self {
            run: Locking::WholeMethod,
            release: Locking::WholeMethod,
        }
    }

    /// Set the declaration for `run`.
    pub fn with_run(mut self, locking: Locking) -> Self {
        self.run = locking;
        self
    }

    /// Set the declaration for `release`.
    pub fn with_release(mut self, locking: Locking) -> Self {
        self.release = locking;
        self
    }

    /// Declaration for the given entry point.
    pub fn get(&self, entry: EntryPoint) -> Locking {
        match entry {
            EntryPoint::Run => self.run,
            EntryPoint::Release => self.release,
        }
    }
}

/// How long a submitter is willing to wait for its work to start running.
///
/// This bounds only the wait for a worker to pick the item up. Once the item
/// is running there is no execution deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartTimeout {
    /// The item must be handed to an idle worker right away.
    Immediate,
    /// The item must start within the given duration.
    Within(Duration),
    /// Wait as long as it takes.
    #[default]
    Indefinite,
}

impl StartTimeout {
    /// Build from milliseconds, where `0` means [`StartTimeout::Immediate`].
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            StartTimeout::Immediate
        } else {
            StartTimeout::Within(Duration::from_millis(ms))
        }
    }

    /// The bounded duration, if any. `Immediate` is reported as zero.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            StartTimeout::Immediate => Some(Duration::ZERO),
            StartTimeout::Within(d) => Some(*d),
            StartTimeout::Indefinite => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl Work for Plain {
        fn run(&self, _signal: &ReleaseSignal) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_declarations() {
        let work = Plain;
        assert_eq!(work.entry_points(), EntryPoints::unsynchronized());
        assert!(work.name().ends_with("Plain"));
    }

    #[test]
    fn test_name_through_trait_object() {
        let work: Box<dyn Work> = Box::new(Plain);
        assert!(work.name().ends_with("Plain"));
    }

    #[test]
    fn test_entry_points_builder() {
        let decl = EntryPoints::unsynchronized().with_release(Locking::WholeMethod);
        assert_eq!(decl.get(EntryPoint::Run), Locking::Unsynchronized);
        assert_eq!(decl.get(EntryPoint::Release), Locking::WholeMethod);
        assert_eq!(EntryPoints::whole_method().run, Locking::WholeMethod);
    }

    #[test]
    fn test_start_timeout_from_millis() {
        assert_eq!(StartTimeout::from_millis(0), StartTimeout::Immediate);
        assert_eq!(
            StartTimeout::from_millis(250).as_duration(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(StartTimeout::Indefinite.as_duration(), None);
    }
}
