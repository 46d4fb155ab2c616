//! Row versioning for optimistic concurrency.

use crate::error::{DomainError, DomainResult};

/// Version a writer read a record at.
///
/// Stock counters are mutated only through versioned writes: every committed
/// write bumps the version by one, so a writer that read version `n` can detect
/// that somebody else committed in between.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {}, actual: {actual})",
                self.0
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_read_version_matches() {
        assert!(ExpectedVersion(0).matches(0));
        assert!(!ExpectedVersion(0).matches(1));
    }

    #[test]
    fn exact_mismatch_is_conflict() {
        assert!(ExpectedVersion(3).check(3).is_ok());
        match ExpectedVersion(3).check(4) {
            Err(DomainError::Conflict(msg)) => assert!(msg.contains("actual: 4")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
