//! Error types for memberlink-engine.

use memberlink_core::{Direction, PassReport, Step};
use memberlink_types::{Candidate, ChannelId, TeamId, UserId};
use std::path::PathBuf;

/// Top-level error for running the engine as a service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Candidate queries and store maintenance failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row held a value the engine cannot interpret.
    #[error("corrupt {column} in store row: {value:?}")]
    CorruptRow {
        /// Column that failed to decode.
        column: &'static str,
        /// The raw value.
        value: String,
    },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Failures of the add/remove membership primitives.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (team, channel, user).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Referenced entity is archived or deactivated.
    #[error("{entity} is archived: {id}")]
    Archived {
        /// Kind of entity (team, channel, user).
        entity: &'static str,
        /// Identifier of the archived entity.
        id: String,
    },

    /// Channel membership requires team membership.
    #[error("user {user_id} is not a member of team {team_id}")]
    NotTeamMember {
        /// The user.
        user_id: UserId,
        /// The team the channel belongs to.
        team_id: TeamId,
    },
}

impl MutationError {
    /// True if retrying the same mutation cannot succeed without a data
    /// change. The engine aborts either way.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Database(_) | Self::Unavailable(_))
    }
}

/// Failures resolving a candidate's place in the hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// Channel does not exist.
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for LookupError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// A single failure inside a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Candidate resolution failed; nothing was applied.
    #[error("resolving candidates failed: {0}")]
    Resolve(#[from] StoreError),

    /// A mutation primitive failed.
    #[error("failed to {step}: {source}")]
    Mutation {
        /// The step that failed.
        step: Step,
        /// Why it failed.
        #[source]
        source: MutationError,
    },

    /// A candidate's parent could not be resolved.
    #[error("failed to look up {candidate}: {source}")]
    Lookup {
        /// The candidate being placed.
        candidate: Candidate,
        /// Why it failed.
        #[source]
        source: LookupError,
    },
}

/// Terminal error of a reconciliation pass.
///
/// Work counted in `report` was applied and stays applied.
#[derive(Debug, thiserror::Error)]
#[error("{direction} pass failed ({report}): {first}")]
pub struct PassError {
    /// Which pass failed.
    pub direction: Direction,
    /// What the pass completed before stopping.
    pub report: PassReport,
    /// The first failure, in candidate order.
    #[source]
    pub first: ReconcileError,
    /// Later failures (continue-on-error passes only).
    pub further: Vec<ReconcileError>,
}

impl PassError {
    /// A pass that failed before applying anything.
    pub fn resolve(direction: Direction, source: StoreError) -> Self {
        Self {
            direction,
            report: PassReport::default(),
            first: ReconcileError::Resolve(source),
            further: Vec::new(),
        }
    }

    /// Iterate over every failure, first one first.
    pub fn failures(&self) -> impl Iterator<Item = &ReconcileError> {
        std::iter::once(&self.first).chain(self.further.iter())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for store queries.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for mutation primitives.
pub type MutationResult<T> = std::result::Result<T, MutationError>;
