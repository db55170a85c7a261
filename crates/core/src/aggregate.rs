//! Aggregate root trait for workflow documents.

use crate::error::{LedgerError, LedgerResult};

/// Aggregate root marker + minimal interface.
///
/// Workflow documents (purchase orders, adjustments, transfers, stocktakes)
/// implement this so the store can check optimistic versions without knowing
/// the concrete document type.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// A freshly created document is at version 1; every accepted operation
    /// bumps it by one.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// The document must not exist yet.
    Absent,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for persisting `next`, which was derived from the version before it.
    pub fn preceding(next_version: u64) -> Self {
        match next_version {
            0 | 1 => ExpectedVersion::Absent,
            v => ExpectedVersion::Exact(v - 1),
        }
    }

    /// `actual` is `None` when nothing is stored yet.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> LedgerResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
