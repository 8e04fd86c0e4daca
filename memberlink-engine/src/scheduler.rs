//! Periodic reconciliation task.
//!
//! Each tick runs the grant pass from the current watermark and then the
//! revoke pass, each under a deadline. The watermark only moves forward
//! after a grant pass succeeds, so a failed or timed-out pass is retried
//! from the same point on the next tick.

use crate::config::{ConfigError, ReconcileConfig};
use crate::error::PassError;
use crate::reconciler::Reconciler;
use crate::sink::EventSink;
use crate::store::{CandidateSource, MembershipDirectory};
use memberlink_core::{Direction, PassReport};
use memberlink_types::Watermark;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// Why a scheduled pass did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The pass returned an error.
    #[error(transparent)]
    Pass(#[from] PassError),

    /// The pass ran past its deadline and was cancelled.
    #[error("{direction} pass exceeded its {deadline:?} deadline")]
    DeadlineExceeded {
        /// Which pass.
        direction: Direction,
        /// The deadline that elapsed.
        deadline: Duration,
    },
}

/// Result of one tick. `None` means the pass is disabled.
#[derive(Debug)]
pub struct TickOutcome {
    /// Grant pass result.
    pub grants: Option<Result<PassReport, TickError>>,
    /// Revoke pass result.
    pub revocations: Option<Result<PassReport, TickError>>,
}

impl TickOutcome {
    /// True if no enabled pass failed.
    pub fn is_success(&self) -> bool {
        [&self.grants, &self.revocations]
            .into_iter()
            .all(|r| !matches!(r, Some(Err(_))))
    }
}

/// Drives a [`Reconciler`] and owns its watermark.
pub struct ReconcileSchedule<S, D, E> {
    engine: Arc<Reconciler<S, D, E>>,
    watermark: Watermark,
    deadline: Duration,
    grants_enabled: bool,
    revocations_enabled: bool,
}

impl<S, D, E> ReconcileSchedule<S, D, E>
where
    S: CandidateSource,
    D: MembershipDirectory,
    E: EventSink,
{
    /// Schedule `engine` starting from `watermark`, both passes enabled.
    pub fn new(engine: Arc<Reconciler<S, D, E>>, watermark: Watermark) -> Self {
        Self {
            engine,
            watermark,
            deadline: DEFAULT_DEADLINE,
            grants_enabled: true,
            revocations_enabled: true,
        }
    }

    /// Schedule `engine` as described by `config`.
    pub fn from_config(
        engine: Arc<Reconciler<S, D, E>>,
        config: &ReconcileConfig,
    ) -> Result<Self, ConfigError> {
        if config.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile.interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if config.deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile.deadline_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self::new(engine, config.watermark()?)
            .with_deadline(Duration::from_secs(config.deadline_secs))
            .with_passes(config.grants_enabled, config.revocations_enabled))
    }

    /// Set the per-pass deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Enable or disable each pass.
    pub fn with_passes(mut self, grants: bool, revocations: bool) -> Self {
        self.grants_enabled = grants;
        self.revocations_enabled = revocations;
        self
    }

    /// Lower bound for the next grant pass.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// The engine being driven.
    pub fn engine(&self) -> &Arc<Reconciler<S, D, E>> {
        &self.engine
    }

    /// Run one grant pass and one revoke pass.
    pub async fn tick(&mut self) -> TickOutcome {
        let started = Watermark::now();

        let grants = if self.grants_enabled {
            let result = self
                .bounded(Direction::Grant, self.engine.sync_grants(self.watermark))
                .await;
            if result.is_ok() {
                self.watermark = started;
            }
            Some(result)
        } else {
            None
        };

        let revocations = if self.revocations_enabled {
            Some(
                self.bounded(Direction::Revoke, self.engine.sync_revocations())
                    .await,
            )
        } else {
            None
        };

        TickOutcome {
            grants,
            revocations,
        }
    }

    async fn bounded<F>(&self, direction: Direction, pass: F) -> Result<PassReport, TickError>
    where
        F: Future<Output = Result<PassReport, PassError>>,
    {
        match timeout(self.deadline, pass).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TickError::DeadlineExceeded {
                direction,
                deadline: self.deadline,
            }),
        }
    }
}

/// Spawn the periodic reconciliation task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_reconcile_task<S, D, E>(
    mut schedule: ReconcileSchedule<S, D, E>,
    config: ReconcileConfig,
) -> tokio::task::JoinHandle<()>
where
    S: CandidateSource + 'static,
    D: MembershipDirectory + 'static,
    E: EventSink + 'static,
{
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Reconcile task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        if interval_secs == 0 {
            tracing::error!("Reconcile task not started: reconcile.interval_secs must be at least 1");
            return;
        }
        tracing::info!(
            "Reconcile task started (interval: {}s, watermark: {})",
            interval_secs,
            schedule.watermark()
        );

        let mut timer = interval(Duration::from_secs(interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            let outcome = schedule.tick().await;
            log_pass("grant", outcome.grants.as_ref());
            log_pass("revoke", outcome.revocations.as_ref());
        }
    })
}

fn log_pass(name: &str, result: Option<&Result<PassReport, TickError>>) {
    match result {
        None => {}
        Some(Ok(report)) if report.applied > 0 => {
            tracing::info!("Reconcile: {} pass {}", name, report);
        }
        Some(Ok(report)) => {
            tracing::debug!("Reconcile: {} pass {}", name, report);
        }
        Some(Err(e @ TickError::DeadlineExceeded { .. })) => {
            tracing::warn!("Reconcile: {}, retrying next tick", e);
        }
        Some(Err(e)) => {
            tracing::error!("Reconcile error: {}", e);
        }
    }
}
