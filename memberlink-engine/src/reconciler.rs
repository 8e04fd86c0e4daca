//! Reconciliation driver.
//!
//! Composes the resolver and the applier into the two public passes. The
//! passes are independent: callers may run them in either order or at the
//! same time, and the engine does not serialise them.

use crate::applier::{Applier, ApplyOptions};
use crate::error::PassError;
use crate::metrics::ReconcileMetrics;
use crate::resolver::CandidateResolver;
use crate::sink::EventSink;
use crate::store::{CandidateSource, MembershipDirectory};
use memberlink_core::{Direction, PassReport};
use memberlink_types::Watermark;
use std::sync::Arc;

/// Group-membership reconciliation engine.
pub struct Reconciler<S, D, E> {
    resolver: CandidateResolver<S>,
    applier: Applier<D, E>,
    metrics: Arc<ReconcileMetrics>,
}

impl<S, D, E> Reconciler<S, D, E>
where
    S: CandidateSource,
    D: MembershipDirectory,
    E: EventSink,
{
    /// Create an engine from its collaborators.
    pub fn new(source: S, directory: D, sink: E, options: ApplyOptions) -> Self {
        let metrics = Arc::new(ReconcileMetrics::new());
        Self {
            resolver: CandidateResolver::new(source),
            applier: Applier::new(directory, sink, options, Arc::clone(&metrics)),
            metrics,
        }
    }

    /// Counters for every pass run by this engine.
    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// The directory mutations go to.
    pub fn directory(&self) -> &D {
        self.applier.directory()
    }

    /// Add users to teams and channels their groups entitle them to, for
    /// group changes at or after `since`.
    ///
    /// On error, work counted in the error's report stays applied; the next
    /// pass recomputes what is left.
    pub async fn sync_grants(&self, since: Watermark) -> Result<PassReport, PassError> {
        let result = match self.resolver.resolve_pending_grants(since).await {
            Ok(grants) => {
                tracing::debug!(
                    %since,
                    teams = grants.teams.len(),
                    channels = grants.channels.len(),
                    "resolved pending grants"
                );
                self.applier.apply_grants(grants).await
            }
            Err(e) => Err(PassError::resolve(Direction::Grant, e)),
        };
        self.finish(Direction::Grant, result)
    }

    /// Remove users from group-constrained teams and channels they no
    /// longer qualify for.
    pub async fn sync_revocations(&self) -> Result<PassReport, PassError> {
        let result = match self.resolver.resolve_pending_removals().await {
            Ok(removals) => {
                tracing::debug!(
                    channels = removals.channels.len(),
                    teams = removals.teams.len(),
                    "resolved pending removals"
                );
                self.applier.apply_revocations(removals).await
            }
            Err(e) => Err(PassError::resolve(Direction::Revoke, e)),
        };
        self.finish(Direction::Revoke, result)
    }

    fn finish(
        &self,
        direction: Direction,
        result: Result<PassReport, PassError>,
    ) -> Result<PassReport, PassError> {
        match &result {
            Ok(report) => {
                self.metrics.record_pass(direction, report, false);
                tracing::debug!(%direction, %report, "pass complete");
            }
            Err(err) => self.metrics.record_pass(direction, &err.report, true),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReconcileError, StoreError};
    use crate::sink::MemorySink;
    use crate::store::{MockDirectory, SqliteStore};
    use async_trait::async_trait;
    use memberlink_types::{
        Channel, ChannelId, GroupChannelLink, GroupId, GroupTeamLink, Principal, Team, TeamId,
        UserChannel, UserId, UserTeam,
    };
    use std::sync::atomic::Ordering;

    /// Source whose channel queries fail.
    struct BrokenSource;

    #[async_trait]
    impl CandidateSource for BrokenSource {
        async fn pending_auto_add_team_members(
            &self,
            _since: Watermark,
        ) -> Result<Vec<UserTeam>, StoreError> {
            Ok(Vec::new())
        }

        async fn pending_auto_add_channel_members(
            &self,
            _since: Watermark,
        ) -> Result<Vec<UserChannel>, StoreError> {
            Err(StoreError::Migration("channel_members is missing".into()))
        }

        async fn pending_team_member_removals(&self) -> Result<Vec<UserTeam>, StoreError> {
            Ok(Vec::new())
        }

        async fn pending_channel_member_removals(&self) -> Result<Vec<UserChannel>, StoreError> {
            Err(StoreError::Migration("channel_members is missing".into()))
        }
    }

    async fn linked_store() -> (SqliteStore, UserId, Team, Channel) {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = UserId::new();
        let group = GroupId::new();
        let team = Team {
            id: TeamId::new(),
            name: "a".into(),
            group_constrained: false,
        };
        let channel = Channel {
            id: ChannelId::new(),
            team_id: team.id,
            name: "c1".into(),
            group_constrained: false,
        };
        let at = Watermark::new(10).unwrap();

        store.upsert_user(&user, "u", false).await.unwrap();
        store.upsert_group(&group, "g").await.unwrap();
        store.upsert_team(&team).await.unwrap();
        store.upsert_channel(&channel).await.unwrap();
        store
            .link_team(
                &GroupTeamLink {
                    group_id: group,
                    team_id: team.id,
                    auto_add: true,
                },
                at,
            )
            .await
            .unwrap();
        store
            .link_channel(
                &GroupChannelLink {
                    group_id: group,
                    channel_id: channel.id,
                    auto_add: true,
                },
                at,
            )
            .await
            .unwrap();
        store
            .add_group_member(&group, &user, Watermark::new(100).unwrap())
            .await
            .unwrap();

        (store, user, team, channel)
    }

    fn engine(store: &SqliteStore, sink: &MemorySink) -> Reconciler<SqliteStore, SqliteStore, MemorySink> {
        Reconciler::new(
            store.clone(),
            store.clone(),
            sink.clone(),
            ApplyOptions {
                actor: Principal::system(),
                ..ApplyOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn sync_grants_end_to_end() {
        let (store, user, team, channel) = linked_store().await;
        let sink = MemorySink::new();
        let engine = engine(&store, &sink);

        let report = engine.sync_grants(Watermark::new(50).unwrap()).await.unwrap();

        assert_eq!(report.resolved, 2);
        assert_eq!(report.applied, 2);
        assert!(store.is_team_member(&team.id, &user).await.unwrap());
        assert!(store.is_channel_member(&channel.id, &user).await.unwrap());
        assert_eq!(engine.metrics().grant_passes_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn second_grant_pass_is_a_no_op() {
        let (store, _, _, _) = linked_store().await;
        let sink = MemorySink::new();
        let engine = engine(&store, &sink);
        let since = Watermark::new(50).unwrap();

        engine.sync_grants(since).await.unwrap();
        sink.clear();
        let report = engine.sync_grants(since).await.unwrap();

        assert_eq!(report, PassReport::default());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn nothing_to_revoke_in_unconstrained_world() {
        let (store, _, _, _) = linked_store().await;
        let sink = MemorySink::new();
        let engine = engine(&store, &sink);

        engine.sync_grants(Watermark::zero()).await.unwrap();
        let report = engine.sync_revocations().await.unwrap();

        assert_eq!(report.resolved, 0);
        assert_eq!(engine.metrics().revoke_passes_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn resolve_failure_fails_pass_before_any_mutation() {
        let store = SqliteStore::in_memory().await.unwrap();
        let directory = MockDirectory::new(store);
        let sink = MemorySink::new();
        let engine = Reconciler::new(
            BrokenSource,
            directory.clone(),
            sink.clone(),
            ApplyOptions::default(),
        );

        let grants = engine.sync_grants(Watermark::zero()).await.unwrap_err();
        let revocations = engine.sync_revocations().await.unwrap_err();

        for (err, direction) in [(&grants, Direction::Grant), (&revocations, Direction::Revoke)] {
            assert_eq!(err.direction, direction);
            assert!(matches!(err.first, ReconcileError::Resolve(_)));
            assert_eq!(err.report, PassReport::default());
            assert_eq!(err.failures().count(), 1);
        }
        assert!(directory.calls().is_empty());
        assert!(sink.is_empty());
        assert_eq!(engine.metrics().pass_failures_total.load(Ordering::Relaxed), 2);
    }
}
