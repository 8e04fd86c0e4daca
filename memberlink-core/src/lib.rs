//! # memberlink-core
//!
//! Pure logic for memberlink (no I/O, instant tests).
//!
//! This crate decides *in what order* membership mutations happen. It never
//! talks to a store; the engine crate resolves candidates, looks up each
//! candidate's ancestry, and executes the [`Step`]s planned here.
//!
//! ## Ordering rules
//!
//! Memberships form a hierarchy (a channel lives in a team). Parents have a
//! lower [`Tier`](memberlink_types::Tier) than their children.
//!
//! - Grants run tier-ascending, and every grant first ensures each ancestor
//!   membership exists.
//! - Revocations run tier-descending, so no parent membership is removed
//!   while a child removal in the same pass is still outstanding.
//!
//! Nothing here assumes the hierarchy is exactly two levels deep.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ledger;
pub mod order;
pub mod plan;
pub mod report;

pub use ledger::FailureLedger;
pub use order::{dedup, tiered, Direction};
pub use plan::{plan_grant, plan_revoke, Op, Step};
pub use report::{FailurePolicy, PassReport};
