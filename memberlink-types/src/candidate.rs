//! Membership targets and reconciliation candidates.

use crate::ids::{ChannelId, TeamId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Depth of a scope in the membership hierarchy. Parents have lower tiers.
pub type Tier = u8;

/// Something a user can be a member of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// Team membership.
    Team(TeamId),
    /// Channel membership; requires membership of the owning team.
    Channel(ChannelId),
}

impl Scope {
    /// Hierarchy depth: teams are 0, channels are 1.
    pub fn tier(&self) -> Tier {
        match self {
            Self::Team(_) => 0,
            Self::Channel(_) => 1,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team(id) => write!(f, "team {}", id),
            Self::Channel(id) => write!(f, "channel {}", id),
        }
    }
}

/// A pending membership change for one user and one scope.
///
/// Only valid within the pass that computed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// The user whose membership changes.
    pub user_id: UserId,
    /// Where the membership lives.
    pub scope: Scope,
}

impl Candidate {
    /// Build a team candidate.
    pub fn team(user_id: UserId, team_id: TeamId) -> Self {
        Self {
            user_id,
            scope: Scope::Team(team_id),
        }
    }

    /// Build a channel candidate.
    pub fn channel(user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            user_id,
            scope: Scope::Channel(channel_id),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {} in {}", self.user_id, self.scope)
    }
}

/// A `(user, team)` pair returned by the candidate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserTeam {
    /// The user.
    pub user_id: UserId,
    /// The team.
    pub team_id: TeamId,
}

/// A `(user, channel)` pair returned by the candidate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserChannel {
    /// The user.
    pub user_id: UserId,
    /// The channel.
    pub channel_id: ChannelId,
}

impl From<UserTeam> for Candidate {
    fn from(pair: UserTeam) -> Self {
        Self::team(pair.user_id, pair.team_id)
    }
}

impl From<UserChannel> for Candidate {
    fn from(pair: UserChannel) -> Self {
        Self::channel(pair.user_id, pair.channel_id)
    }
}
