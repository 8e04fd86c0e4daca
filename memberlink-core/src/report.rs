//! Pass outcomes and failure policy.

use serde::Deserialize;
use std::fmt;

/// What to do when a mutation or lookup fails mid-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failure. Remaining candidates are picked up by the
    /// next pass.
    #[default]
    FailFast,
    /// Keep applying independent candidates; dependents of a failure are
    /// skipped.
    ContinueOnError,
}

/// Counts for one reconciliation pass.
///
/// On failure this describes the work that was applied before the pass
/// stopped. Applied mutations are never rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Candidates returned by the resolver.
    pub resolved: usize,
    /// Candidates fully processed, whether or not they changed anything.
    pub completed: usize,
    /// Mutations that changed the store (one event each).
    pub applied: usize,
    /// Mutations that found the store already in the wanted state.
    pub unchanged: usize,
    /// Candidates not attempted because a dependency failed.
    pub skipped: usize,
    /// Candidates that failed.
    pub failed: usize,
}

impl PassReport {
    /// A report for a pass that resolved `resolved` candidates.
    pub fn with_resolved(resolved: usize) -> Self {
        Self {
            resolved,
            ..Self::default()
        }
    }

    /// Candidates never reached (fail-fast stop).
    pub fn unattempted(&self) -> usize {
        self.resolved
            .saturating_sub(self.completed + self.skipped + self.failed)
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resolved={} completed={} applied={} unchanged={} skipped={} failed={}",
            self.resolved,
            self.completed,
            self.applied,
            self.unchanged,
            self.skipped,
            self.failed
        )
    }
}
