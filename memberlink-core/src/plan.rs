//! Step planning for individual candidates.
//!
//! This module turns a candidate plus its ancestry into the list of
//! mutations the applier must perform, in order. The planner is a pure
//! function; the caller performs the I/O and stops on the first failing step.

use memberlink_types::{Candidate, MembershipEvent, Scope, UserId};
use std::fmt;

/// Kind of mutation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Make sure a prerequisite (ancestor) membership exists.
    Ensure,
    /// Create the candidate's own membership.
    Add,
    /// Delete the candidate's membership.
    Remove,
}

/// A single membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// What to do.
    pub op: Op,
    /// Whose membership.
    pub user_id: UserId,
    /// Which membership.
    pub scope: Scope,
}

impl Step {
    /// The event to emit if this step actually changed the store.
    pub fn event(&self) -> MembershipEvent {
        match self.op {
            Op::Ensure | Op::Add => MembershipEvent::added(self.user_id, self.scope),
            Op::Remove => MembershipEvent::removed(self.user_id, self.scope),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.op {
            Op::Ensure => "ensure",
            Op::Add => "add",
            Op::Remove => "remove",
        };
        write!(f, "{} user {} in {}", verb, self.user_id, self.scope)
    }
}

/// Plan a grant.
///
/// `ancestry` lists the candidate's ancestor scopes root first. Each one
/// gets an [`Op::Ensure`] step before the candidate's own [`Op::Add`].
pub fn plan_grant(candidate: &Candidate, ancestry: &[Scope]) -> Vec<Step> {
    ancestry
        .iter()
        .map(|scope| Step {
            op: Op::Ensure,
            user_id: candidate.user_id,
            scope: *scope,
        })
        .chain(std::iter::once(Step {
            op: Op::Add,
            user_id: candidate.user_id,
            scope: candidate.scope,
        }))
        .collect()
}

/// Plan a revocation.
///
/// Ancestors are left alone: a parent is only removed when it is itself a
/// candidate, and tier ordering runs it after its children.
pub fn plan_revoke(candidate: &Candidate) -> Vec<Step> {
    vec![Step {
        op: Op::Remove,
        user_id: candidate.user_id,
        scope: candidate.scope,
    }]
}
