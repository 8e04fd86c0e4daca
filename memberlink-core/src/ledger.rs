//! Per-pass failure bookkeeping for continue-on-error passes.
//!
//! When a pass keeps going after a failure, later candidates that depend on
//! the failed one must not run:
//! - a grant whose ancestor failed for the same user is skipped, otherwise
//!   the child would be created without its parent;
//! - a removal whose descendant failed for the same user is held, otherwise
//!   the parent would disappear under a child that is still present.

use memberlink_types::{Candidate, Scope, Tier, UserId};
use std::collections::{HashMap, HashSet};

/// Failures recorded so far in one pass.
#[derive(Debug, Default, Clone)]
pub struct FailureLedger {
    /// Grants that failed (including failed ancestor ensures).
    failed: HashSet<(UserId, Scope)>,
    /// Removals held because a descendant removal failed.
    held: HashSet<(UserId, Scope)>,
    /// Per user: removals below this tier are held (ancestry unknown).
    held_below: HashMap<UserId, Tier>,
}

impl FailureLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing has failed yet.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.held.is_empty() && self.held_below.is_empty()
    }

    /// Record that granting `scope` to `user_id` failed.
    pub fn record_grant_failure(&mut self, user_id: UserId, scope: Scope) {
        self.failed.insert((user_id, scope));
    }

    /// True if the candidate or any of its ancestors already failed.
    pub fn blocks_grant(&self, candidate: &Candidate, ancestry: &[Scope]) -> bool {
        std::iter::once(&candidate.scope)
            .chain(ancestry)
            .any(|scope| self.failed.contains(&(candidate.user_id, *scope)))
    }

    /// Record a failed removal.
    ///
    /// With known ancestry every ancestor is held for that user. Without it
    /// (the lookup itself failed) every lower-tier removal for the user is
    /// held.
    pub fn record_revoke_failure(&mut self, candidate: &Candidate, ancestry: Option<&[Scope]>) {
        match ancestry {
            Some(ancestors) => {
                for scope in ancestors {
                    self.held.insert((candidate.user_id, *scope));
                }
            }
            None => {
                let tier = candidate.scope.tier();
                self.held_below
                    .entry(candidate.user_id)
                    .and_modify(|t| *t = (*t).max(tier))
                    .or_insert(tier);
            }
        }
    }

    /// True if removing this candidate would orphan a failed child.
    pub fn blocks_revoke(&self, candidate: &Candidate) -> bool {
        if self.held.contains(&(candidate.user_id, candidate.scope)) {
            return true;
        }
        self.held_below
            .get(&candidate.user_id)
            .is_some_and(|tier| candidate.scope.tier() < *tier)
    }
}
