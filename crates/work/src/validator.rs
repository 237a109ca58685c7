//! Structural admission check for work items.

use tracing::warn;
use workman_core::{ContractViolation, EntryPoint, Locking, Work};

/// Refuses work whose `run` or `release` is declared as locked for its whole
/// body.
///
/// A method-wide lock on `run` would make `release` wait for `run` to finish,
/// defeating it. The check looks only at the declaration from
/// [`Work::entry_points`]; locking inside the bodies is not inspected.
#[derive(Debug, Clone, Copy)]
pub struct ContractValidator {
    enforce: bool,
}

impl Default for ContractValidator {
    fn default() -> Self {
        Self { enforce: true }
    }
}

impl ContractValidator {
    /// Create a validator. With `enforce` off, violations are only logged.
    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }

    /// Whether violations reject the work.
    pub fn is_enforcing(&self) -> bool {
        self.enforce
    }

    /// Check `work` before admission.
    pub fn validate(&self, work: &dyn Work) -> Result<(), ContractViolation> {
        let declared = work.entry_points();

        for entry in [EntryPoint::Run, EntryPoint::Release] {
            if declared.get(entry) == Locking::WholeMethod {
                let violation = ContractViolation::SynchronizedEntryPoint { entry };
                if self.enforce {
                    return Err(violation);
                }
                warn!(work = work.name(), %violation, "admitting work despite contract violation");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workman_core::{EntryPoints, ReleaseSignal};

    struct Declared(EntryPoints);

    impl Work for Declared {
        fn run(&self, _signal: &ReleaseSignal) -> anyhow::Result<()> {
            Ok(())
        }

        fn entry_points(&self) -> EntryPoints {
            self.0
        }
    }

    #[test]
    fn test_unsynchronized_passes() {
        let validator = ContractValidator::default();
        assert!(validator
            .validate(&Declared(EntryPoints::unsynchronized()))
            .is_ok());
    }

    #[test]
    fn test_synchronized_run_is_refused() {
        let validator = ContractValidator::default();
        let work = Declared(EntryPoints::unsynchronized().with_run(Locking::WholeMethod));
        assert_eq!(
            validator.validate(&work),
            Err(ContractViolation::SynchronizedEntryPoint {
                entry: EntryPoint::Run
            })
        );
    }

    #[test]
    fn test_synchronized_release_is_refused() {
        let validator = ContractValidator::default();
        let work = Declared(EntryPoints::unsynchronized().with_release(Locking::WholeMethod));
        assert_eq!(
            validator.validate(&work),
            Err(ContractViolation::SynchronizedEntryPoint {
                entry: EntryPoint::Release
            })
        );
    }

    #[test]
    fn test_run_reported_first_when_both_declared() {
        let validator = ContractValidator::default();
        let err = validator
            .validate(&Declared(EntryPoints::whole_method()))
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::SynchronizedEntryPoint {
                entry: EntryPoint::Run
            }
        );
    }

    #[test]
    fn test_lenient_mode_admits() {
        let validator = ContractValidator::new(false);
        assert!(!validator.is_enforcing());
        assert!(validator
            .validate(&Declared(EntryPoints::whole_method()))
            .is_ok());
    }
}
