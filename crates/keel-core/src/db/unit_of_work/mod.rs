//! Module: db::unit_of_work
//! Responsibility: per-session scheduling state and write ordering.
//! Does not own: statement construction or execution (see `db::session`).
//!
//! Invariants:
//! - Inserts run prerequisites first; deletes run dependents first.
//! - A cycle through identifier embedding is rejected before any statement.
//! - A cycle through nullable foreign keys is broken with a follow-up update.
//! - A failed flush refuses further flushes until the session is cleared.

mod order;


use crate::{
    db::entity::EntityHandle,
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
};
use thiserror::Error as ThisError;

// re-exports
pub use order::{DependencyGraph, EdgeKind, InsertPlan};

///
/// FlushError
///

#[derive(Debug, ThisError)]
pub enum FlushError {
    #[error("identifier dependency cycle: {cycle}")]
    CircularIdentifierDependency { cycle: String },

    #[error("two instances share identity '{key}'")]
    DuplicateIdentity { key: String },

    #[error("identifier of managed '{entity}' changed from '{key}'")]
    IdentifierChanged { entity: String, key: String },

    #[error("session failed during an earlier flush; clear it before flushing again")]
    SessionFailed,

    #[error("'{entity}.{field}' references a new '{target}' that was never persisted")]
    UnpersistedReference {
        entity: String,
        field: String,
        target: String,
    },
}

impl FlushError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateIdentity { .. } => ErrorClass::Conflict,
            Self::IdentifierChanged { .. } => ErrorClass::Unsupported,
            Self::CircularIdentifierDependency { .. }
            | Self::SessionFailed
            | Self::UnpersistedReference { .. } => ErrorClass::InvariantViolation,
        }
    }
}

impl From<FlushError> for InternalError {
    fn from(err: FlushError) -> Self {
        Self::with_detail(err.class(), ErrorOrigin::UnitOfWork, ErrorDetail::Flush(Box::new(err)))
    }
}

///
/// FlushState
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushState {
    Clean,
    Scheduled,
    Flushing,
    Failed,
}

///
/// FlushReport
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushReport {
    pub inserted: u64,
    pub updated: u64,
    pub extra_updates: u64,
    pub deleted: u64,
}

impl FlushReport {
    #[must_use]
    pub const fn statements(&self) -> u64 {
        self.inserted + self.updated + self.extra_updates + self.deleted
    }
}

///
/// UnitOfWork
///
/// Scheduled inserts and deletes in scheduling order, plus the flush state.
///

#[derive(Debug)]
pub struct UnitOfWork {
    state: FlushState,
    inserts: Vec<EntityHandle>,
    deletes: Vec<EntityHandle>,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FlushState::Clean,
            inserts: Vec::new(),
            deletes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> FlushState {
        self.state
    }

    /// Scheduled inserts, in scheduling order.
    #[must_use]
    pub fn inserts(&self) -> &[EntityHandle] {
        &self.inserts
    }

    /// Scheduled deletes, in scheduling order.
    #[must_use]
    pub fn deletes(&self) -> &[EntityHandle] {
        &self.deletes
    }

    #[must_use]
    pub fn is_scheduled_insert(&self, handle: &EntityHandle) -> bool {
        self.inserts.iter().any(|h| h.ptr_eq(handle))
    }

    #[must_use]
    pub fn is_scheduled_delete(&self, handle: &EntityHandle) -> bool {
        self.deletes.iter().any(|h| h.ptr_eq(handle))
    }

    /// Returns false if the handle was already scheduled.
    pub fn schedule_insert(&mut self, handle: &EntityHandle) -> bool {
        if self.is_scheduled_insert(handle) {
            return false;
        }
        self.inserts.push(handle.clone());
        self.mark_scheduled();
        true
    }

    /// Returns false if the handle was already scheduled.
    pub fn schedule_delete(&mut self, handle: &EntityHandle) -> bool {
        if self.is_scheduled_delete(handle) {
            return false;
        }
        self.deletes.push(handle.clone());
        self.mark_scheduled();
        true
    }

    /// Drop any pending insert or delete for the handle.
    pub fn unschedule(&mut self, handle: &EntityHandle) {
        self.inserts.retain(|h| !h.ptr_eq(handle));
        self.deletes.retain(|h| !h.ptr_eq(handle));
    }

    /// Enter `Flushing`; a failed unit of work refuses.
    pub fn begin_flush(&mut self) -> Result<(), FlushError> {
        if self.state == FlushState::Failed {
            return Err(FlushError::SessionFailed);
        }
        self.state = FlushState::Flushing;
        Ok(())
    }

    /// Leave `Flushing` after validation failed and nothing was written.
    pub fn abort_flush(&mut self) {
        self.state = if self.inserts.is_empty() && self.deletes.is_empty() {
            FlushState::Clean
        } else {
            FlushState::Scheduled
        };
    }

    /// All scheduled work is written.
    pub fn finish_flush(&mut self) {
        self.inserts.clear();
        self.deletes.clear();
        self.state = FlushState::Clean;
    }

    /// A statement failed; storage may hold a partial flush.
    pub const fn fail(&mut self) {
        self.state = FlushState::Failed;
    }

    /// Forget everything, including a failure.
    pub fn reset(&mut self) {
        self.inserts.clear();
        self.deletes.clear();
        self.state = FlushState::Clean;
    }

    const fn mark_scheduled(&mut self) {
        if matches!(self.state, FlushState::Clean) {
            self.state = FlushState::Scheduled;
        }
    }
}
