//! # memberlink-types
//!
//! Shared types for memberlink group-membership reconciliation.
//!
//! This crate provides the foundational types used across all memberlink crates:
//! - [`UserId`], [`TeamId`], [`ChannelId`], [`GroupId`], [`Watermark`] - Identity and ordering types
//! - [`Scope`], [`Candidate`] - Pending membership changes
//! - [`MembershipEvent`], [`AuditRecord`], [`Principal`] - Attributed audit events
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod audit;
mod candidate;
mod entity;
mod error;
mod ids;

pub use audit::{AuditRecord, MembershipEvent, Principal};
pub use candidate::{Candidate, Scope, Tier, UserChannel, UserTeam};
pub use entity::{Channel, GroupChannelLink, GroupTeamLink, Team};
pub use error::TypesError;
pub use ids::{ChannelId, GroupId, TeamId, UserId, Watermark};
