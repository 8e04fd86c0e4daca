//! Tier ordering for candidate batches.
//!
//! Candidates are grouped by the tier of their scope. Grants walk the tiers
//! from the root down, revocations from the leaves up. Within a tier the
//! order the store returned is kept.

use memberlink_types::Candidate;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Which way a pass moves through the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Parents before children.
    Grant,
    /// Children before parents.
    Revoke,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grant => f.write_str("grant"),
            Self::Revoke => f.write_str("revoke"),
        }
    }
}

/// Drop repeated items, keeping the first occurrence.
pub fn dedup<T, I>(items: I) -> Vec<T>
where
    T: Copy + Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}

/// Order candidates into tier batches for the given direction.
///
/// The sort is stable, so candidates in the same tier keep their relative
/// order.
pub fn tiered(mut candidates: Vec<Candidate>, direction: Direction) -> Vec<Candidate> {
    match direction {
        Direction::Grant => candidates.sort_by_key(|c| c.scope.tier()),
        Direction::Revoke => candidates.sort_by_key(|c| std::cmp::Reverse(c.scope.tier())),
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use memberlink_types::{ChannelId, TeamId, UserId};

    #[test]
    fn dedup_keeps_first_seen_order() {
        let u = UserId::new();
        let a = Candidate::team(u, TeamId::new());
        let b = Candidate::team(u, TeamId::new());

        let out = dedup(vec![a, b, a, b, a]);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn dedup_same_scope_different_users_are_distinct() {
        let team = TeamId::new();
        let a = Candidate::team(UserId::new(), team);
        let b = Candidate::team(UserId::new(), team);
        assert_eq!(dedup(vec![a, b]).len(), 2);
    }

    #[test]
    fn grants_put_teams_first() {
        let u = UserId::new();
        let c1 = Candidate::channel(u, ChannelId::new());
        let t1 = Candidate::team(u, TeamId::new());
        let c2 = Candidate::channel(u, ChannelId::new());
        let t2 = Candidate::team(u, TeamId::new());

        let out = tiered(vec![c1, t1, c2, t2], Direction::Grant);
        assert_eq!(out, vec![t1, t2, c1, c2]);
    }

    #[test]
    fn revocations_put_channels_first() {
        let u = UserId::new();
        let t1 = Candidate::team(u, TeamId::new());
        let c1 = Candidate::channel(u, ChannelId::new());
        let t2 = Candidate::team(u, TeamId::new());
        let c2 = Candidate::channel(u, ChannelId::new());

        let out = tiered(vec![t1, c1, t2, c2], Direction::Revoke);
        assert_eq!(out, vec![c1, c2, t1, t2]);
    }

    #[test]
    fn direction_display() {
        assert_eq!(Direction::Grant.to_string(), "grant");
        assert_eq!(Direction::Revoke.to_string(), "revoke");
    }

    #[test]
    fn empty_batch_is_empty() {
        assert!(tiered(Vec::new(), Direction::Grant).is_empty());
        assert!(dedup(Vec::<Candidate>::new()).is_empty());
    }
}
