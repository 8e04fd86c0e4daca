//! End-to-end reconciliation against a SQLite store.

use memberlink_core::{FailurePolicy, Op, PassReport};
use memberlink_engine::{
    ApplyOptions, DirectoryCall, MembershipDirectory, MemorySink, MockDirectory, ReconcileError,
    ReconcileSchedule, Reconciler, SqliteStore,
};
use memberlink_types::{
    Channel, ChannelId, GroupChannelLink, GroupId, GroupTeamLink, MembershipEvent, Principal,
    Scope, Team, TeamId, UserId, Watermark,
};
use std::sync::Arc;

type Engine = Reconciler<SqliteStore, MockDirectory<SqliteStore>, MemorySink>;

struct Harness {
    store: SqliteStore,
    directory: MockDirectory<SqliteStore>,
    sink: MemorySink,
    engine: Engine,
}

fn at(millis: i64) -> Watermark {
    Watermark::new(millis).unwrap()
}

async fn harness(policy: FailurePolicy) -> Harness {
    let store = SqliteStore::in_memory().await.unwrap();
    let directory = MockDirectory::new(store.clone());
    let sink = MemorySink::new();
    let engine = Reconciler::new(
        store.clone(),
        directory.clone(),
        sink.clone(),
        ApplyOptions {
            actor: Principal::new("group-sync").unwrap(),
            failure_policy: policy,
        },
    );
    Harness {
        store,
        directory,
        sink,
        engine,
    }
}

impl Harness {
    async fn user(&self, name: &str) -> UserId {
        let id = UserId::new();
        self.store.upsert_user(&id, name, false).await.unwrap();
        id
    }

    async fn team(&self, name: &str, group_constrained: bool) -> Team {
        let team = Team {
            id: TeamId::new(),
            name: name.into(),
            group_constrained,
        };
        self.store.upsert_team(&team).await.unwrap();
        team
    }

    async fn channel(&self, team: &Team, name: &str, group_constrained: bool) -> Channel {
        let channel = Channel {
            id: ChannelId::new(),
            team_id: team.id,
            name: name.into(),
            group_constrained,
        };
        self.store.upsert_channel(&channel).await.unwrap();
        channel
    }

    async fn group(&self, name: &str) -> GroupId {
        let id = GroupId::new();
        self.store.upsert_group(&id, name).await.unwrap();
        id
    }

    async fn link(&self, group: GroupId, team: &Team, channels: &[&Channel], auto_add: bool) {
        self.store
            .link_team(
                &GroupTeamLink {
                    group_id: group,
                    team_id: team.id,
                    auto_add,
                },
                at(10),
            )
            .await
            .unwrap();
        for channel in channels {
            self.store
                .link_channel(
                    &GroupChannelLink {
                        group_id: group,
                        channel_id: channel.id,
                        auto_add,
                    },
                    at(10),
                )
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn grant_scenario_adds_team_then_channel_with_two_events() {
    let h = harness(FailurePolicy::FailFast).await;
    let u = h.user("u").await;
    let g = h.group("g").await;
    let a = h.team("a", false).await;
    let c1 = h.channel(&a, "c1", false).await;
    h.link(g, &a, &[&c1], true).await;
    h.store.add_group_member(&g, &u, at(100)).await.unwrap();

    let report = h.engine.sync_grants(at(50)).await.unwrap();

    assert_eq!(report.resolved, 2);
    assert_eq!(report.applied, 2);
    assert_eq!(report.unchanged, 1);
    assert_eq!(
        h.sink.events(),
        vec![
            MembershipEvent::added(u, Scope::Team(a.id)),
            MembershipEvent::added(u, Scope::Channel(c1.id)),
        ]
    );
    assert_eq!(
        h.directory.mutations(),
        vec![
            DirectoryCall::AddTeamMember {
                team_id: a.id,
                user_id: u
            },
            DirectoryCall::AddTeamMember {
                team_id: a.id,
                user_id: u
            },
            DirectoryCall::AddChannelMember {
                user_id: u,
                channel_id: c1.id
            },
        ]
    );
}

#[tokio::test]
async fn grants_are_idempotent() {
    let h = harness(FailurePolicy::FailFast).await;
    let u = h.user("u").await;
    let g = h.group("g").await;
    let a = h.team("a", false).await;
    let c1 = h.channel(&a, "c1", false).await;
    h.link(g, &a, &[&c1], true).await;
    h.store.add_group_member(&g, &u, at(100)).await.unwrap();

    h.engine.sync_grants(at(50)).await.unwrap();
    h.sink.clear();
    h.directory.clear_calls();

    let report = h.engine.sync_grants(at(50)).await.unwrap();

    assert_eq!(report, PassReport::default());
    assert!(h.sink.is_empty());
    assert!(h.directory.mutations().is_empty());
}

#[tokio::test]
async fn team_membership_exists_before_every_channel_add() {
    let h = harness(FailurePolicy::FailFast).await;
    let g = h.group("g").await;
    let mut users = Vec::new();
    for name in ["a", "b", "c"] {
        users.push(h.user(name).await);
    }
    let t1 = h.team("t1", false).await;
    let t2 = h.team("t2", false).await;
    let c1 = h.channel(&t1, "c1", false).await;
    let c2 = h.channel(&t2, "c2", false).await;
    // Only channels are linked; team membership must come from the parent ensure.
    for channel in [&c1, &c2] {
        h.store
            .link_channel(
                &GroupChannelLink {
                    group_id: g,
                    channel_id: channel.id,
                    auto_add: true,
                },
                at(10),
            )
            .await
            .unwrap();
    }
    for u in &users {
        h.store.add_group_member(&g, u, at(100)).await.unwrap();
    }

    let report = h.engine.sync_grants(at(0)).await.unwrap();
    assert_eq!(report.resolved, 6);

    let calls = h.directory.mutations();
    for (i, call) in calls.iter().enumerate() {
        if let DirectoryCall::AddChannelMember {
            user_id,
            channel_id,
        } = call
        {
            let team_id = if *channel_id == c1.id { t1.id } else { t2.id };
            let parent = DirectoryCall::AddTeamMember {
                team_id,
                user_id: *user_id,
            };
            assert!(calls[..i].contains(&parent), "channel add before team add");
        }
    }
    for u in &users {
        assert!(h.store.is_channel_member(&c1.id, u).await.unwrap());
        assert!(h.store.is_channel_member(&c2.id, u).await.unwrap());
    }
}

#[tokio::test]
async fn fail_fast_leaves_earlier_grants_and_skips_later_ones() {
    let h = harness(FailurePolicy::FailFast).await;
    let g = h.group("g").await;
    let team = h.team("t", false).await;
    h.link(g, &team, &[], true).await;
    for name in ["a", "b", "c", "d"] {
        let u = h.user(name).await;
        h.store.add_group_member(&g, &u, at(100)).await.unwrap();
    }
    h.directory.fail_nth_mutation(2);

    let err = h.engine.sync_grants(at(0)).await.unwrap_err();

    assert!(matches!(err.first, ReconcileError::Mutation { .. }));
    assert_eq!(err.report.applied, 2);
    assert_eq!(err.report.unattempted(), 1);
    assert_eq!(h.directory.mutations().len(), 3);
    assert_eq!(h.sink.len(), 2);

    // The next pass picks up exactly what is left, without re-emitting.
    h.sink.clear();
    let report = h.engine.sync_grants(at(0)).await.unwrap();
    assert_eq!(report.resolved, 2);
    assert_eq!(report.applied, 2);
    assert_eq!(h.sink.len(), 2);
}

#[tokio::test]
async fn failed_parent_team_step_stops_channel_grant() {
    let h = harness(FailurePolicy::FailFast).await;
    let g = h.group("g").await;
    let team = h.team("t", false).await;
    let c1 = h.channel(&team, "c1", false).await;
    h.store
        .link_channel(
            &GroupChannelLink {
                group_id: g,
                channel_id: c1.id,
                auto_add: true,
            },
            at(10),
        )
        .await
        .unwrap();
    for name in ["a", "b"] {
        let u = h.user(name).await;
        h.store.add_group_member(&g, &u, at(100)).await.unwrap();
    }
    h.directory.fail_nth_mutation(0);

    let err = h.engine.sync_grants(at(0)).await.unwrap_err();

    match &err.first {
        ReconcileError::Mutation { step, .. } => {
            assert_eq!(step.op, Op::Ensure);
            assert_eq!(step.scope, Scope::Team(team.id));
        }
        other => panic!("unexpected failure {:?}", other),
    }
    let calls = h.directory.mutations();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], DirectoryCall::AddTeamMember { .. }));
    assert_eq!(err.report.failed, 1);
    assert_eq!(err.report.unattempted(), 1);
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn failed_channel_add_keeps_parent_and_retries_without_duplicate_event() {
    let h = harness(FailurePolicy::FailFast).await;
    let u = h.user("u").await;
    let g = h.group("g").await;
    let team = h.team("t", false).await;
    let c1 = h.channel(&team, "c1", false).await;
    h.link(g, &team, &[&c1], true).await;
    h.store.add_group_member(&g, &u, at(100)).await.unwrap();
    h.directory.fail_mutation(u, Scope::Channel(c1.id));

    let err = h.engine.sync_grants(at(0)).await.unwrap_err();

    match &err.first {
        ReconcileError::Mutation { step, .. } => {
            assert_eq!(step.op, Op::Add);
            assert_eq!(step.scope, Scope::Channel(c1.id));
        }
        other => panic!("unexpected failure {:?}", other),
    }
    assert!(h.store.is_team_member(&team.id, &u).await.unwrap());
    assert!(!h.store.is_channel_member(&c1.id, &u).await.unwrap());
    assert_eq!(
        h.sink.events(),
        vec![MembershipEvent::added(u, Scope::Team(team.id))]
    );

    h.directory.heal();
    h.sink.clear();
    let report = h.engine.sync_grants(at(0)).await.unwrap();

    assert_eq!(report.resolved, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(
        h.sink.events(),
        vec![MembershipEvent::added(u, Scope::Channel(c1.id))]
    );
}

#[tokio::test]
async fn revoke_scenario_removes_channel_then_team() {
    let h = harness(FailurePolicy::FailFast).await;
    let u = h.user("u").await;
    let g = h.group("g").await;
    let a = h.team("a", true).await;
    let c1 = h.channel(&a, "c1", true).await;
    h.link(g, &a, &[&c1], false).await;
    h.store.add_team_member(&a.id, &u).await.unwrap();
    h.store.add_channel_member(&u, &c1).await.unwrap();

    let report = h.engine.sync_revocations().await.unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(
        h.sink.events(),
        vec![
            MembershipEvent::removed(u, Scope::Channel(c1.id)),
            MembershipEvent::removed(u, Scope::Team(a.id)),
        ]
    );
    assert!(!h.store.is_team_member(&a.id, &u).await.unwrap());
    assert_eq!(
        h.store
            .removed_by(&u, &Scope::Channel(c1.id))
            .await
            .unwrap()
            .as_deref(),
        Some("group-sync")
    );
}

#[tokio::test]
async fn fail_fast_revocation_stops_at_first_channel_failure() {
    let h = harness(FailurePolicy::FailFast).await;
    let a = h.team("a", true).await;
    let c1 = h.channel(&a, "c1", true).await;
    let c2 = h.channel(&a, "c2", true).await;
    let mut users = Vec::new();
    for name in ["x", "y"] {
        let u = h.user(name).await;
        h.store.add_team_member(&a.id, &u).await.unwrap();
        h.store.add_channel_member(&u, &c1).await.unwrap();
        h.store.add_channel_member(&u, &c2).await.unwrap();
        users.push(u);
    }
    h.directory.fail_nth_mutation(0);

    let err = h.engine.sync_revocations().await.unwrap_err();

    assert!(matches!(
        &err.first,
        ReconcileError::Mutation { step, .. } if step.op == Op::Remove
    ));
    assert_eq!(err.report.resolved, 6);
    assert_eq!(err.report.failed, 1);
    assert_eq!(err.report.unattempted(), 5);
    let calls = h.directory.mutations();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], DirectoryCall::RemoveChannelMember { .. }));
    assert!(h.sink.is_empty());
    for u in &users {
        assert!(h.store.is_team_member(&a.id, u).await.unwrap());
        assert!(h.store.is_channel_member(&c1.id, u).await.unwrap());
        assert!(h.store.is_channel_member(&c2.id, u).await.unwrap());
    }
}

#[tokio::test]
async fn group_members_keep_constrained_memberships() {
    let h = harness(FailurePolicy::FailFast).await;
    let stays = h.user("stays").await;
    let leaves = h.user("leaves").await;
    let g = h.group("g").await;
    let a = h.team("a", true).await;
    let c1 = h.channel(&a, "c1", true).await;
    h.link(g, &a, &[&c1], true).await;
    for u in [&stays, &leaves] {
        h.store.add_group_member(&g, u, at(100)).await.unwrap();
    }
    h.engine.sync_grants(at(0)).await.unwrap();

    h.store.remove_group_member(&g, &leaves).await.unwrap();
    h.sink.clear();
    let report = h.engine.sync_revocations().await.unwrap();

    assert_eq!(report.resolved, 2);
    assert!(h.sink.events().iter().all(|e| e.user_id() == leaves));
    assert!(h.store.is_channel_member(&c1.id, &stays).await.unwrap());
    assert!(!h.store.is_team_member(&a.id, &leaves).await.unwrap());

    // A second pass finds nothing.
    assert_eq!(h.engine.sync_revocations().await.unwrap().resolved, 0);
}

#[tokio::test]
async fn every_channel_removal_precedes_every_team_removal() {
    let h = harness(FailurePolicy::FailFast).await;
    let a = h.team("a", true).await;
    let b = h.team("b", true).await;
    let ca = h.channel(&a, "ca", true).await;
    let cb = h.channel(&b, "cb", true).await;
    for name in ["x", "y"] {
        let u = h.user(name).await;
        for (team, channel) in [(&a, &ca), (&b, &cb)] {
            h.store.add_team_member(&team.id, &u).await.unwrap();
            h.store.add_channel_member(&u, channel).await.unwrap();
        }
    }

    h.engine.sync_revocations().await.unwrap();

    let calls = h.directory.mutations();
    assert_eq!(calls.len(), 8);
    let first_team = calls
        .iter()
        .position(|c| matches!(c, DirectoryCall::RemoveTeamMember { .. }))
        .unwrap();
    assert!(calls[first_team..]
        .iter()
        .all(|c| matches!(c, DirectoryCall::RemoveTeamMember { .. })));
}

#[tokio::test]
async fn removals_are_attributed_to_configured_actor() {
    let h = harness(FailurePolicy::FailFast).await;
    let u = h.user("u").await;
    let a = h.team("a", true).await;
    let c1 = h.channel(&a, "c1", true).await;
    h.store.add_team_member(&a.id, &u).await.unwrap();
    h.store.add_channel_member(&u, &c1).await.unwrap();

    h.engine.sync_revocations().await.unwrap();

    let actor = Principal::new("group-sync").unwrap();
    for call in h.directory.mutations() {
        match call {
            DirectoryCall::RemoveChannelMember { acting, .. } => assert_eq!(acting, actor),
            DirectoryCall::RemoveTeamMember { requestor, .. } => assert_eq!(requestor, actor),
            other => panic!("unexpected call {:?}", other),
        }
    }
    assert!(h
        .sink
        .records()
        .iter()
        .all(|r| !r.actor.as_str().is_empty()));
}

#[tokio::test]
async fn continue_on_error_holds_team_removal_of_failed_channel() {
    let h = harness(FailurePolicy::ContinueOnError).await;
    let stuck = h.user("stuck").await;
    let free = h.user("free").await;
    let a = h.team("a", true).await;
    let c1 = h.channel(&a, "c1", true).await;
    for u in [&stuck, &free] {
        h.store.add_team_member(&a.id, u).await.unwrap();
        h.store.add_channel_member(u, &c1).await.unwrap();
    }
    h.directory.fail_mutation(stuck, Scope::Channel(c1.id));

    let err = h.engine.sync_revocations().await.unwrap_err();

    assert_eq!(err.report.failed, 1);
    assert_eq!(err.report.skipped, 1);
    assert_eq!(err.failures().count(), 1);
    assert!(h.store.is_team_member(&a.id, &stuck).await.unwrap());
    assert!(h.store.is_channel_member(&c1.id, &stuck).await.unwrap());
    assert!(!h.store.is_team_member(&a.id, &free).await.unwrap());

    h.directory.heal();
    let report = h.engine.sync_revocations().await.unwrap();
    assert_eq!(report.applied, 2);
    assert!(!h.store.is_team_member(&a.id, &stuck).await.unwrap());
}

#[tokio::test]
async fn grant_and_revoke_passes_may_run_concurrently() {
    let h = harness(FailurePolicy::FailFast).await;
    let joiner = h.user("joiner").await;
    let leaver = h.user("leaver").await;
    let g = h.group("g").await;
    let a = h.team("a", true).await;
    let c1 = h.channel(&a, "c1", true).await;
    h.link(g, &a, &[&c1], true).await;
    h.store.add_group_member(&g, &joiner, at(100)).await.unwrap();
    h.store.add_team_member(&a.id, &leaver).await.unwrap();
    h.store.add_channel_member(&leaver, &c1).await.unwrap();

    let (grants, revocations) = tokio::join!(
        h.engine.sync_grants(at(0)),
        h.engine.sync_revocations()
    );

    assert!(grants.is_ok());
    assert!(revocations.is_ok());
    assert!(h.store.is_channel_member(&c1.id, &joiner).await.unwrap());
    assert!(!h.store.is_team_member(&a.id, &leaver).await.unwrap());
    assert_eq!(h.sink.len(), 4);
}

#[tokio::test]
async fn scheduler_retries_failed_grants_from_the_same_watermark() {
    let store = SqliteStore::in_memory().await.unwrap();
    let directory = MockDirectory::new(store.clone());
    let sink = MemorySink::new();
    let engine = Arc::new(Reconciler::new(
        store.clone(),
        directory.clone(),
        sink.clone(),
        ApplyOptions::default(),
    ));

    let u = UserId::new();
    let g = GroupId::new();
    let team = Team {
        id: TeamId::new(),
        name: "t".into(),
        group_constrained: false,
    };
    store.upsert_user(&u, "u", false).await.unwrap();
    store.upsert_group(&g, "g").await.unwrap();
    store.upsert_team(&team).await.unwrap();
    store
        .link_team(
            &GroupTeamLink {
                group_id: g,
                team_id: team.id,
                auto_add: true,
            },
            at(10),
        )
        .await
        .unwrap();
    store.add_group_member(&g, &u, at(100)).await.unwrap();

    let mut schedule = ReconcileSchedule::new(Arc::clone(&engine), at(50));
    directory.fail_mutation(u, Scope::Team(team.id));

    let outcome = schedule.tick().await;
    assert!(!outcome.is_success());
    assert_eq!(schedule.watermark(), at(50));

    directory.heal();
    let outcome = schedule.tick().await;
    assert!(outcome.is_success());
    assert!(schedule.watermark() > at(50));
    assert!(store.is_team_member(&team.id, &u).await.unwrap());
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.records()[0].actor, Principal::system());
}
