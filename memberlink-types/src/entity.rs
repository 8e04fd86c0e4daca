//! Store-owned records the engine reads but never edits.

use crate::ids::{ChannelId, GroupId, TeamId};
use serde::{Deserialize, Serialize};

/// A team as seen by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team identifier.
    pub id: TeamId,
    /// Display name.
    pub name: String,
    /// Membership restricted to members of linked groups.
    pub group_constrained: bool,
}

/// A channel as seen by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier.
    pub id: ChannelId,
    /// The team that owns this channel.
    pub team_id: TeamId,
    /// Display name.
    pub name: String,
    /// Membership restricted to members of linked groups.
    pub group_constrained: bool,
}

/// Association between a group and a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTeamLink {
    /// The linked group.
    pub group_id: GroupId,
    /// The linked team.
    pub team_id: TeamId,
    /// Members of the group are granted team membership automatically.
    pub auto_add: bool,
}

/// Association between a group and a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChannelLink {
    /// The linked group.
    pub group_id: GroupId,
    /// The linked channel.
    pub channel_id: ChannelId,
    /// Members of the group are granted channel membership automatically.
    pub auto_add: bool,
}
