//! Event sinks for applied membership mutations.

use memberlink_types::{AuditRecord, MembershipEvent, Scope};
use std::sync::{Arc, Mutex, PoisonError};

/// Receives one [`AuditRecord`] per applied mutation.
pub trait EventSink: Send + Sync {
    /// Deliver a record. Must not fail the pass.
    fn emit(&self, record: AuditRecord);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, record: AuditRecord) {
        (**self).emit(record)
    }
}

/// Writes each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: AuditRecord) {
        let event = record.event.name();
        let user_id = record.event.user_id();
        match record.event.scope() {
            Scope::Team(team_id) => tracing::info!(
                event = event,
                user_id = %user_id,
                team_id = %team_id,
                actor = %record.actor,
                "membership changed"
            ),
            Scope::Channel(channel_id) => tracing::info!(
                event = event,
                user_id = %user_id,
                channel_id = %channel_id,
                actor = %record.actor,
                "membership changed"
            ),
        }
    }
}

/// Keeps records in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records so far, in emission order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Just the events, in emission order.
    pub fn events(&self) -> Vec<MembershipEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    /// Number of records so far.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
