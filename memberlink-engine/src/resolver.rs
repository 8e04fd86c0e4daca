//! Candidate resolution.
//!
//! Reads the pending grant and removal pairs from a [`CandidateSource`] and
//! removes duplicates. A query failure yields no partial result.

use crate::error::StoreResult;
use crate::store::CandidateSource;
use memberlink_core::dedup;
use memberlink_types::{Candidate, UserChannel, UserTeam, Watermark};

/// Pairs that should gain membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingGrants {
    /// Users to add to teams.
    pub teams: Vec<UserTeam>,
    /// Users to add to channels.
    pub channels: Vec<UserChannel>,
}

impl PendingGrants {
    /// Total number of pairs.
    pub fn len(&self) -> usize {
        self.teams.len() + self.channels.len()
    }

    /// True if there is nothing to grant.
    pub fn is_empty(&self) -> bool {
        self.teams.is_empty() && self.channels.is_empty()
    }

    /// Flatten into candidates, teams first.
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.teams
            .into_iter()
            .map(Candidate::from)
            .chain(self.channels.into_iter().map(Candidate::from))
            .collect()
    }
}

/// Pairs that should lose membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRemovals {
    /// Users to remove from channels.
    pub channels: Vec<UserChannel>,
    /// Users to remove from teams.
    pub teams: Vec<UserTeam>,
}

impl PendingRemovals {
    /// Total number of pairs.
    pub fn len(&self) -> usize {
        self.teams.len() + self.channels.len()
    }

    /// True if there is nothing to remove.
    pub fn is_empty(&self) -> bool {
        self.teams.is_empty() && self.channels.is_empty()
    }

    /// Flatten into candidates, channels first.
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.channels
            .into_iter()
            .map(Candidate::from)
            .chain(self.teams.into_iter().map(Candidate::from))
            .collect()
    }
}

/// Computes candidate sets from a [`CandidateSource`].
#[derive(Debug, Clone)]
pub struct CandidateResolver<S> {
    source: S,
}

impl<S: CandidateSource> CandidateResolver<S> {
    /// Create a resolver over `source`.
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Users entitled to team or channel membership through a group change
    /// at or after `since`.
    pub async fn resolve_pending_grants(&self, since: Watermark) -> StoreResult<PendingGrants> {
        let teams = self.source.pending_auto_add_team_members(since).await?;
        let channels = self.source.pending_auto_add_channel_members(since).await?;

        Ok(PendingGrants {
            teams: dedup(teams),
            channels: dedup(channels),
        })
    }

    /// Members of group-constrained teams and channels who no longer belong
    /// to any linked group.
    pub async fn resolve_pending_removals(&self) -> StoreResult<PendingRemovals> {
        let channels = self.source.pending_channel_member_removals().await?;
        let teams = self.source.pending_team_member_removals().await?;

        Ok(PendingRemovals {
            channels: dedup(channels),
            teams: dedup(teams),
        })
    }
}
