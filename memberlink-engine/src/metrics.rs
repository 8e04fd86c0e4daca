//! Reconciliation counters in Prometheus text format.

use memberlink_core::{Direction, PassReport};
use memberlink_types::MembershipEvent;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operational metrics for reconciliation passes.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    /// Grant passes run.
    pub grant_passes_total: AtomicU64,
    /// Revoke passes run.
    pub revoke_passes_total: AtomicU64,
    /// Passes that returned an error.
    pub pass_failures_total: AtomicU64,
    /// Candidates returned by the resolver.
    pub candidates_resolved_total: AtomicU64,
    /// Candidates skipped because a dependency failed.
    pub candidates_skipped_total: AtomicU64,
    /// Mutations that found nothing to do.
    pub mutations_unchanged_total: AtomicU64,
    /// `added-team-member` events.
    pub added_team_members_total: AtomicU64,
    /// `added-channel-member` events.
    pub added_channel_members_total: AtomicU64,
    /// `removed-team-member` events.
    pub removed_team_members_total: AtomicU64,
    /// `removed-channel-member` events.
    pub removed_channel_members_total: AtomicU64,
}

impl ReconcileMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one applied mutation.
    pub fn record_event(&self, event: &MembershipEvent) {
        let counter = match event {
            MembershipEvent::AddedTeamMember { .. } => &self.added_team_members_total,
            MembershipEvent::AddedChannelMember { .. } => &self.added_channel_members_total,
            MembershipEvent::RemovedTeamMember { .. } => &self.removed_team_members_total,
            MembershipEvent::RemovedChannelMember { .. } => &self.removed_channel_members_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished pass.
    pub fn record_pass(&self, direction: Direction, report: &PassReport, failed: bool) {
        let passes = match direction {
            Direction::Grant => &self.grant_passes_total,
            Direction::Revoke => &self.revoke_passes_total,
        };
        passes.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.pass_failures_total.fetch_add(1, Ordering::Relaxed);
        }
        self.candidates_resolved_total
            .fetch_add(report.resolved as u64, Ordering::Relaxed);
        self.candidates_skipped_total
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.mutations_unchanged_total
            .fetch_add(report.unchanged as u64, Ordering::Relaxed);
    }

    /// Render every counter in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let grants = self.grant_passes_total.load(Ordering::Relaxed);
        let revokes = self.revoke_passes_total.load(Ordering::Relaxed);
        let failures = self.pass_failures_total.load(Ordering::Relaxed);
        let resolved = self.candidates_resolved_total.load(Ordering::Relaxed);
        let skipped = self.candidates_skipped_total.load(Ordering::Relaxed);
        let unchanged = self.mutations_unchanged_total.load(Ordering::Relaxed);
        let added_team = self.added_team_members_total.load(Ordering::Relaxed);
        let added_channel = self.added_channel_members_total.load(Ordering::Relaxed);
        let removed_team = self.removed_team_members_total.load(Ordering::Relaxed);
        let removed_channel = self.removed_channel_members_total.load(Ordering::Relaxed);

        format!(
            r#"# HELP memberlink_info Engine information
# TYPE memberlink_info gauge
memberlink_info{{version="{version}"}} 1

# HELP memberlink_passes_total Reconciliation passes run
# TYPE memberlink_passes_total counter
memberlink_passes_total{{direction="grant"}} {grants}
memberlink_passes_total{{direction="revoke"}} {revokes}

# HELP memberlink_pass_failures_total Reconciliation passes that returned an error
# TYPE memberlink_pass_failures_total counter
memberlink_pass_failures_total {failures}

# HELP memberlink_candidates_resolved_total Candidates returned by the resolver
# TYPE memberlink_candidates_resolved_total counter
memberlink_candidates_resolved_total {resolved}

# HELP memberlink_candidates_skipped_total Candidates skipped after a dependency failed
# TYPE memberlink_candidates_skipped_total counter
memberlink_candidates_skipped_total {skipped}

# HELP memberlink_mutations_unchanged_total Mutations that found the store already reconciled
# TYPE memberlink_mutations_unchanged_total counter
memberlink_mutations_unchanged_total {unchanged}

# HELP memberlink_mutations_applied_total Mutations that changed membership
# TYPE memberlink_mutations_applied_total counter
memberlink_mutations_applied_total{{event="added-team-member"}} {added_team}
memberlink_mutations_applied_total{{event="added-channel-member"}} {added_channel}
memberlink_mutations_applied_total{{event="removed-team-member"}} {removed_team}
memberlink_mutations_applied_total{{event="removed-channel-member"}} {removed_channel}
"#,
            version = env!("CARGO_PKG_VERSION"),
        )
    }
}
