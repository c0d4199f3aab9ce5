//! Aggregate traits for state-machine domain models.

use crate::error::{DomainError, DomainResult};

/// Aggregate root: identity plus a version bumped by every accepted change.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of transitions applied since creation (1 right after creation).
    ///
    /// Stores compare it against [`ExpectedVersion`] so two writers racing on
    /// the same journal cannot both win.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation when persisting an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip the check (bulk maintenance only).
    Any,
    /// The stored row must still be at this version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale version (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Pure decision/evolution split.
///
/// - `handle(&self, cmd)` validates a command against current state and
///   returns the events it produces, without mutating anything.
/// - `apply(&mut self, event)` evolves state and bumps the version.
///
/// No IO happens here; services load state, call `handle`, `apply` the
/// result, and persist the row together with the events.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_rejects_stale_writers() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        assert!(matches!(
            ExpectedVersion::Exact(2).check(3),
            Err(DomainError::Conflict(_))
        ));
        assert!(ExpectedVersion::Any.matches(42));
    }
}
