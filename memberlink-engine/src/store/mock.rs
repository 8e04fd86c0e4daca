//! Failure-injecting directory wrapper for testing.
//!
//! Forwards every call to an inner directory, records the calls it sees, and
//! fails the ones it has been told to fail.

use super::{MembershipChange, MembershipDirectory};
use crate::error::{LookupError, MutationError};
use async_trait::async_trait;
use memberlink_types::{Channel, ChannelId, Principal, Scope, TeamId, UserId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call observed by [`MockDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    /// `get_channel`.
    GetChannel(ChannelId),
    /// `add_team_member`.
    AddTeamMember {
        /// Target team.
        team_id: TeamId,
        /// User being added.
        user_id: UserId,
    },
    /// `add_channel_member`.
    AddChannelMember {
        /// User being added.
        user_id: UserId,
        /// Target channel.
        channel_id: ChannelId,
    },
    /// `remove_channel_member`.
    RemoveChannelMember {
        /// Principal the removal was attributed to.
        acting: Principal,
        /// User being removed.
        user_id: UserId,
        /// Target channel.
        channel_id: ChannelId,
    },
    /// `remove_team_member`.
    RemoveTeamMember {
        /// Target team.
        team_id: TeamId,
        /// User being removed.
        user_id: UserId,
        /// Principal the removal was attributed to.
        requestor: Principal,
    },
}

impl DirectoryCall {
    /// The `(user, scope)` a mutation call targets. `None` for lookups.
    pub fn target(&self) -> Option<(UserId, Scope)> {
        match self {
            Self::GetChannel(_) => None,
            Self::AddTeamMember { team_id, user_id }
            | Self::RemoveTeamMember {
                team_id, user_id, ..
            } => Some((*user_id, Scope::Team(*team_id))),
            Self::AddChannelMember {
                user_id,
                channel_id,
            }
            | Self::RemoveChannelMember {
                user_id,
                channel_id,
                ..
            } => Some((*user_id, Scope::Channel(*channel_id))),
        }
    }

    /// True for add and remove calls.
    pub fn is_mutation(&self) -> bool {
        self.target().is_some()
    }
}

#[derive(Debug, Default)]
struct MockDirectoryInner {
    calls: Vec<DirectoryCall>,
    mutations: usize,
    fail_targets: HashSet<(UserId, Scope)>,
    fail_lookups: HashSet<ChannelId>,
    fail_mutation_at: Option<usize>,
}

/// Directory wrapper for testing.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug)]
pub struct MockDirectory<D> {
    inner: D,
    state: Arc<Mutex<MockDirectoryInner>>,
}

impl<D> MockDirectory<D> {
    /// Wrap `inner`.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(MockDirectoryInner::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockDirectoryInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every add or remove of `user_id` in `scope`.
    pub fn fail_mutation(&self, user_id: UserId, scope: Scope) {
        self.state().fail_targets.insert((user_id, scope));
    }

    /// Fail the `n`th mutation call from now (0 is the next one).
    pub fn fail_nth_mutation(&self, n: usize) {
        let mut state = self.state();
        state.fail_mutation_at = Some(state.mutations + n);
    }

    /// Report `channel_id` as missing on lookup.
    pub fn fail_lookup(&self, channel_id: ChannelId) {
        self.state().fail_lookups.insert(channel_id);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        let mut state = self.state();
        state.fail_targets.clear();
        state.fail_lookups.clear();
        state.fail_mutation_at = None;
    }

    /// Every call seen so far, in order.
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state().calls.clone()
    }

    /// Only the add and remove calls, in order.
    pub fn mutations(&self) -> Vec<DirectoryCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget recorded calls. Injected failures stay armed.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn record_mutation(&self, call: DirectoryCall) -> Result<(), MutationError> {
        let mut state = self.state();
        let index = state.mutations;
        state.mutations += 1;

        let forced = state.fail_mutation_at == Some(index)
            || call
                .target()
                .is_some_and(|target| state.fail_targets.contains(&target));
        state.calls.push(call);

        if forced {
            return Err(MutationError::Unavailable(format!(
                "injected failure on mutation {}",
                index
            )));
        }
        Ok(())
    }
}

impl<D: Clone> Clone for MockDirectory<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl<D: MembershipDirectory> MembershipDirectory for MockDirectory<D> {
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, LookupError> {
        let forced = {
            let mut state = self.state();
            state.calls.push(DirectoryCall::GetChannel(*channel_id));
            state.fail_lookups.contains(channel_id)
        };
        if forced {
            return Err(LookupError::ChannelNotFound(*channel_id));
        }
        self.inner.get_channel(channel_id).await
    }

    async fn add_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
    ) -> Result<MembershipChange, MutationError> {
        self.record_mutation(DirectoryCall::AddTeamMember {
            team_id: *team_id,
            user_id: *user_id,
        })?;
        self.inner.add_team_member(team_id, user_id).await
    }

    async fn add_channel_member(
        &self,
        user_id: &UserId,
        channel: &Channel,
    ) -> Result<MembershipChange, MutationError> {
        self.record_mutation(DirectoryCall::AddChannelMember {
            user_id: *user_id,
            channel_id: channel.id,
        })?;
        self.inner.add_channel_member(user_id, channel).await
    }

    async fn remove_channel_member(
        &self,
        acting: &Principal,
        user_id: &UserId,
        channel: &Channel,
    ) -> Result<MembershipChange, MutationError> {
        self.record_mutation(DirectoryCall::RemoveChannelMember {
            acting: acting.clone(),
            user_id: *user_id,
            channel_id: channel.id,
        })?;
        self.inner
            .remove_channel_member(acting, user_id, channel)
            .await
    }

    async fn remove_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
        requestor: &Principal,
    ) -> Result<MembershipChange, MutationError> {
        self.record_mutation(DirectoryCall::RemoveTeamMember {
            team_id: *team_id,
            user_id: *user_id,
            requestor: requestor.clone(),
        })?;
        self.inner
            .remove_team_member(team_id, user_id, requestor)
            .await
    }
}
