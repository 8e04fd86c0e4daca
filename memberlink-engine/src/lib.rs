//! # memberlink-engine
//!
//! Group-membership reconciliation engine.
//!
//! Keeps team and channel membership consistent with group membership:
//! - the grant pass adds users to teams and channels linked to their groups
//!   with `auto_add`, for group changes since a watermark;
//! - the revoke pass removes users from group-constrained teams and channels
//!   when no linked group still contains them.
//!
//! ## Architecture
//!
//! ```text
//!  CandidateSource ──► CandidateResolver ──► Applier ──► MembershipDirectory
//!   (SqliteStore)       (dedup)              │  tiered order,       (SqliteStore)
//!                                            │  planned steps
//!                                            └──► EventSink (one record per applied mutation)
//! ```
//!
//! [`Reconciler`] wires these together; [`ReconcileSchedule`] runs it
//! periodically and owns the watermark.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod applier;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod resolver;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use applier::{Applier, ApplyOptions};
pub use config::Config;
pub use error::{
    EngineError, LookupError, MutationError, PassError, ReconcileError, Result, StoreError,
};
pub use metrics::ReconcileMetrics;
pub use reconciler::Reconciler;
pub use resolver::{CandidateResolver, PendingGrants, PendingRemovals};
pub use scheduler::{spawn_reconcile_task, ReconcileSchedule, TickError, TickOutcome};
pub use sink::{EventSink, MemorySink, TracingSink};
pub use store::{
    CandidateSource, DirectoryCall, MembershipChange, MembershipDirectory, MockDirectory,
    SqliteStore,
};
