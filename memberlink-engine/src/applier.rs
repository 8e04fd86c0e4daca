//! Applies resolved candidates in dependency order.
//!
//! Candidates are batched by tier ([`tiered`]), each candidate is placed in
//! the hierarchy, and the steps from [`plan_grant`] / [`plan_revoke`] are
//! executed against a [`MembershipDirectory`] one at a time. An event is
//! emitted only for a step that reported [`MembershipChange::Applied`].

use crate::error::{LookupError, MutationError, PassError, ReconcileError};
use crate::metrics::ReconcileMetrics;
use crate::resolver::{PendingGrants, PendingRemovals};
use crate::sink::EventSink;
use crate::store::{MembershipChange, MembershipDirectory};
use memberlink_core::{
    plan_grant, plan_revoke, tiered, Direction, FailureLedger, FailurePolicy, Op, PassReport, Step,
};
use memberlink_types::{AuditRecord, Candidate, Channel, ChannelId, Principal, Scope, Watermark};
use std::collections::HashMap;
use std::sync::Arc;

/// How the applier attributes and handles failures.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Principal removals and audit records are attributed to.
    pub actor: Principal,
    /// What to do after the first failure.
    pub failure_policy: FailurePolicy,
}

/// A candidate's position in the hierarchy.
struct Placement {
    /// Ancestor scopes, root first.
    ancestry: Vec<Scope>,
    /// The candidate's own channel, for channel candidates.
    channel: Option<Channel>,
}

/// Per-pass state.
struct Pass {
    direction: Direction,
    report: PassReport,
    ledger: FailureLedger,
    failures: Vec<ReconcileError>,
    /// Channel lookups, valid for this pass only.
    channels: HashMap<ChannelId, Channel>,
}

impl Pass {
    fn new(direction: Direction, resolved: usize) -> Self {
        Self {
            direction,
            report: PassReport::with_resolved(resolved),
            ledger: FailureLedger::new(),
            failures: Vec::new(),
            channels: HashMap::new(),
        }
    }

    fn finish(self) -> Result<PassReport, PassError> {
        let mut failures = self.failures.into_iter();
        match failures.next() {
            None => Ok(self.report),
            Some(first) => Err(PassError {
                direction: self.direction,
                report: self.report,
                first,
                further: failures.collect(),
            }),
        }
    }
}

/// Executes grant and revoke passes against a directory.
pub struct Applier<D, E> {
    directory: D,
    sink: E,
    options: ApplyOptions,
    metrics: Arc<ReconcileMetrics>,
}

impl<D, E> Applier<D, E>
where
    D: MembershipDirectory,
    E: EventSink,
{
    /// Create an applier.
    pub fn new(directory: D, sink: E, options: ApplyOptions, metrics: Arc<ReconcileMetrics>) -> Self {
        Self {
            directory,
            sink,
            options,
            metrics,
        }
    }

    /// The directory mutations go to.
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Add every pending pair, parents before children.
    pub async fn apply_grants(&self, grants: PendingGrants) -> Result<PassReport, PassError> {
        let candidates = tiered(grants.into_candidates(), Direction::Grant);
        let mut pass = Pass::new(Direction::Grant, candidates.len());

        for candidate in candidates {
            if let Err(err) = self.grant(&candidate, &mut pass).await {
                tracing::warn!(%candidate, error = %err, "grant failed");
                pass.report.failed += 1;
                pass.failures.push(err);
                if self.options.failure_policy == FailurePolicy::FailFast {
                    break;
                }
            }
        }

        pass.finish()
    }

    /// Remove every pending pair, children before parents.
    pub async fn apply_revocations(
        &self,
        removals: PendingRemovals,
    ) -> Result<PassReport, PassError> {
        let candidates = tiered(removals.into_candidates(), Direction::Revoke);
        let mut pass = Pass::new(Direction::Revoke, candidates.len());

        for candidate in candidates {
            if let Err(err) = self.revoke(&candidate, &mut pass).await {
                tracing::warn!(%candidate, error = %err, "revocation failed");
                pass.report.failed += 1;
                pass.failures.push(err);
                if self.options.failure_policy == FailurePolicy::FailFast {
                    break;
                }
            }
        }

        pass.finish()
    }

    async fn grant(&self, candidate: &Candidate, pass: &mut Pass) -> Result<(), ReconcileError> {
        let placement = match self.place(candidate, pass).await {
            Ok(placement) => placement,
            Err(source) => {
                pass.ledger
                    .record_grant_failure(candidate.user_id, candidate.scope);
                return Err(ReconcileError::Lookup {
                    candidate: *candidate,
                    source,
                });
            }
        };

        if pass.ledger.blocks_grant(candidate, &placement.ancestry) {
            tracing::debug!(%candidate, "skipping grant, a parent failed");
            pass.report.skipped += 1;
            return Ok(());
        }

        for step in plan_grant(candidate, &placement.ancestry) {
            if let Err(source) = self.run(&step, &placement, &mut pass.report).await {
                pass.ledger.record_grant_failure(step.user_id, step.scope);
                pass.ledger
                    .record_grant_failure(candidate.user_id, candidate.scope);
                return Err(ReconcileError::Mutation { step, source });
            }
        }

        pass.report.completed += 1;
        Ok(())
    }

    async fn revoke(&self, candidate: &Candidate, pass: &mut Pass) -> Result<(), ReconcileError> {
        if pass.ledger.blocks_revoke(candidate) {
            tracing::debug!(%candidate, "holding removal, a child removal failed");
            pass.report.skipped += 1;
            return Ok(());
        }

        let placement = match self.place(candidate, pass).await {
            Ok(placement) => placement,
            Err(source) => {
                pass.ledger.record_revoke_failure(candidate, None);
                return Err(ReconcileError::Lookup {
                    candidate: *candidate,
                    source,
                });
            }
        };

        for step in plan_revoke(candidate) {
            if let Err(source) = self.run(&step, &placement, &mut pass.report).await {
                pass.ledger
                    .record_revoke_failure(candidate, Some(&placement.ancestry));
                return Err(ReconcileError::Mutation { step, source });
            }
        }

        pass.report.completed += 1;
        Ok(())
    }

    /// Look up the candidate's ancestry.
    async fn place(&self, candidate: &Candidate, pass: &mut Pass) -> Result<Placement, LookupError> {
        match candidate.scope {
            Scope::Team(_) => Ok(Placement {
                ancestry: Vec::new(),
                channel: None,
            }),
            Scope::Channel(channel_id) => {
                let channel = match pass.channels.get(&channel_id) {
                    Some(channel) => channel.clone(),
                    None => {
                        let channel = self.directory.get_channel(&channel_id).await?;
                        pass.channels.insert(channel_id, channel.clone());
                        channel
                    }
                };
                Ok(Placement {
                    ancestry: vec![Scope::Team(channel.team_id)],
                    channel: Some(channel),
                })
            }
        }
    }

    /// Execute one step and account for its outcome.
    async fn run(
        &self,
        step: &Step,
        placement: &Placement,
        report: &mut PassReport,
    ) -> Result<(), MutationError> {
        let change = self.execute(step, placement).await?;
        match change {
            MembershipChange::Applied => {
                let event = step.event();
                report.applied += 1;
                self.metrics.record_event(&event);
                self.sink.emit(AuditRecord {
                    actor: self.options.actor.clone(),
                    event,
                    at: Watermark::now(),
                });
            }
            MembershipChange::Unchanged => {
                tracing::debug!(%step, "already reconciled");
                report.unchanged += 1;
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        step: &Step,
        placement: &Placement,
    ) -> Result<MembershipChange, MutationError> {
        let actor = &self.options.actor;
        match (step.op, step.scope) {
            (Op::Ensure | Op::Add, Scope::Team(team_id)) => {
                self.directory
                    .add_team_member(&team_id, &step.user_id)
                    .await
            }
            (Op::Ensure | Op::Add, Scope::Channel(channel_id)) => {
                let channel = placed_channel(placement, channel_id)?;
                self.directory
                    .add_channel_member(&step.user_id, channel)
                    .await
            }
            (Op::Remove, Scope::Team(team_id)) => {
                self.directory
                    .remove_team_member(&team_id, &step.user_id, actor)
                    .await
            }
            (Op::Remove, Scope::Channel(channel_id)) => {
                let channel = placed_channel(placement, channel_id)?;
                self.directory
                    .remove_channel_member(actor, &step.user_id, channel)
                    .await
            }
        }
    }
}

fn placed_channel(placement: &Placement, channel_id: ChannelId) -> Result<&Channel, MutationError> {
    placement
        .channel
        .as_ref()
        .filter(|channel| channel.id == channel_id)
        .ok_or_else(|| MutationError::NotFound {
            entity: "channel",
            id: channel_id.to_string(),
        })
}
