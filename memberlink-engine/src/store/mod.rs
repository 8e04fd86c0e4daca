//! Collaborator contracts for the reconciliation engine.
//!
//! The engine reads candidates through [`CandidateSource`] and mutates
//! memberships through [`MembershipDirectory`]. [`SqliteStore`] implements
//! both; [`MockDirectory`] wraps any directory for failure injection.

mod mock;
mod sqlite;

pub use mock::{DirectoryCall, MockDirectory};
pub use sqlite::SqliteStore;

use crate::error::{LookupError, MutationError, StoreError};
use async_trait::async_trait;
use memberlink_types::{Channel, ChannelId, Principal, TeamId, UserChannel, UserId, UserTeam, Watermark};

/// Outcome of an idempotent membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// The row was created or removed.
    Applied,
    /// The row was already present (add) or already absent (remove).
    Unchanged,
}

/// Candidate queries against the membership store.
///
/// Every query returns each pair at most once and never returns a pair
/// whose store state already matches the wanted state.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Users in an auto-add group linked to a team they are not a member of,
    /// whose group membership (or the link) changed at or after `since`.
    async fn pending_auto_add_team_members(
        &self,
        since: Watermark,
    ) -> Result<Vec<UserTeam>, StoreError>;

    /// Same as [`pending_auto_add_team_members`](Self::pending_auto_add_team_members)
    /// for channels.
    async fn pending_auto_add_channel_members(
        &self,
        since: Watermark,
    ) -> Result<Vec<UserChannel>, StoreError>;

    /// Members of group-constrained teams that belong to no group linked to
    /// the team.
    async fn pending_team_member_removals(&self) -> Result<Vec<UserTeam>, StoreError>;

    /// Members of group-constrained channels that belong to no group linked
    /// to the channel.
    async fn pending_channel_member_removals(&self) -> Result<Vec<UserChannel>, StoreError>;
}

/// Membership mutation primitives and hierarchy lookups.
///
/// Adds are add-if-absent and removes are remove-if-present, so concurrent
/// or repeated calls are safe.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Look up a channel, including the team that owns it.
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, LookupError>;

    /// Add a user to a team.
    async fn add_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
    ) -> Result<MembershipChange, MutationError>;

    /// Add a user to a channel. The user must already be a team member.
    async fn add_channel_member(
        &self,
        user_id: &UserId,
        channel: &Channel,
    ) -> Result<MembershipChange, MutationError>;

    /// Remove a user from a channel on behalf of `acting`.
    async fn remove_channel_member(
        &self,
        acting: &Principal,
        user_id: &UserId,
        channel: &Channel,
    ) -> Result<MembershipChange, MutationError>;

    /// Remove a user from a team on behalf of `requestor`.
    async fn remove_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
        requestor: &Principal,
    ) -> Result<MembershipChange, MutationError>;
}
