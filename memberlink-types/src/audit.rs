//! Attribution and audit events.
//!
//! Every applied membership mutation produces exactly one
//! [`MembershipEvent`], wrapped in an [`AuditRecord`] naming who acted.

use crate::candidate::Scope;
use crate::error::TypesError;
use crate::ids::{ChannelId, TeamId, UserId, Watermark};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity a mutation is attributed to.
///
/// Never empty. Automated reconciliation acts as [`Principal::system`]
/// unless configured otherwise.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Name used for automated changes when nothing else is configured.
    pub const SYSTEM: &'static str = "system";

    /// Create a principal, rejecting blank names.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::EmptyPrincipal`] if `name` is empty or whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, TypesError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptyPrincipal);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The built-in system principal.
    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    /// The principal's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::system()
    }
}

impl TryFrom<String> for Principal {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.0)
    }
}

/// Observable membership mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum MembershipEvent {
    /// A team membership was created.
    AddedTeamMember {
        /// The new member.
        user_id: UserId,
        /// The team joined.
        team_id: TeamId,
    },
    /// A channel membership was created.
    AddedChannelMember {
        /// The new member.
        user_id: UserId,
        /// The channel joined.
        channel_id: ChannelId,
    },
    /// A team membership was removed.
    RemovedTeamMember {
        /// The former member.
        user_id: UserId,
        /// The team left.
        team_id: TeamId,
    },
    /// A channel membership was removed.
    RemovedChannelMember {
        /// The former member.
        user_id: UserId,
        /// The channel left.
        channel_id: ChannelId,
    },
}

impl MembershipEvent {
    /// Event for a membership that was created.
    pub fn added(user_id: UserId, scope: Scope) -> Self {
        match scope {
            Scope::Team(team_id) => Self::AddedTeamMember { user_id, team_id },
            Scope::Channel(channel_id) => Self::AddedChannelMember {
                user_id,
                channel_id,
            },
        }
    }

    /// Event for a membership that was removed.
    pub fn removed(user_id: UserId, scope: Scope) -> Self {
        match scope {
            Scope::Team(team_id) => Self::RemovedTeamMember { user_id, team_id },
            Scope::Channel(channel_id) => Self::RemovedChannelMember {
                user_id,
                channel_id,
            },
        }
    }

    /// Stable kebab-case name, matching the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddedTeamMember { .. } => "added-team-member",
            Self::AddedChannelMember { .. } => "added-channel-member",
            Self::RemovedTeamMember { .. } => "removed-team-member",
            Self::RemovedChannelMember { .. } => "removed-channel-member",
        }
    }

    /// The affected user.
    pub fn user_id(&self) -> UserId {
        match self {
            Self::AddedTeamMember { user_id, .. }
            | Self::AddedChannelMember { user_id, .. }
            | Self::RemovedTeamMember { user_id, .. }
            | Self::RemovedChannelMember { user_id, .. } => *user_id,
        }
    }

    /// The affected scope.
    pub fn scope(&self) -> Scope {
        match self {
            Self::AddedTeamMember { team_id, .. } | Self::RemovedTeamMember { team_id, .. } => {
                Scope::Team(*team_id)
            }
            Self::AddedChannelMember { channel_id, .. }
            | Self::RemovedChannelMember { channel_id, .. } => Scope::Channel(*channel_id),
        }
    }
}

/// An attributed membership event, as handed to audit sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Who performed the mutation.
    pub actor: Principal,
    /// What happened.
    #[serde(flatten)]
    pub event: MembershipEvent,
    /// When it happened.
    pub at: Watermark,
}
