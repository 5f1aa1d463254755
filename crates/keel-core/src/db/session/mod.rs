//! Module: db::session
//! Responsibility: the application-facing session: lookup, hydration,
//! scheduling, and flush over one storage executor.
//! Does not own: metadata (shared, read-only) or transactions.
//!
//! Invariants:
//! - One live instance per identity while the session is alive.
//! - Hydration registers an instance before filling its associations.
//! - Every flush validation runs before the first statement executes.
//! - Placeholders only resolve against the session generation that made them.

mod flush;
mod hydrate;

#[cfg(test)]
mod tests;

use crate::{
    config::SessionConfig,
    db::{
        entity::{EntityHandle, Lazy, Lifecycle},
        identifier::{IdentifierCodec, IdentifierInput, StorageIdentifier},
        identity_map::IdentityMap,
        storage::StorageExecutor,
        unit_of_work::{FlushReport, FlushState, UnitOfWork},
    },
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    metadata::Metadata,
};
use std::{
    cell::{Ref, RefCell, RefMut},
    rc::{Rc, Weak},
    sync::Arc,
};
use thiserror::Error as ThisError;
use tracing::debug;

///
/// SessionError
///

#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("session is busy; it cannot be re-entered while an operation is running")]
    Busy,

    #[error("placeholder for '{entity}' outlived the session that created it")]
    Detached { entity: String },

    #[error("'{entity}' instance is detached from this session")]
    DetachedInstance { entity: String },

    #[error("no '{entity}' row for identity '{key}'")]
    EntityNotFound { entity: String, key: String },

    #[error("field '{entity}.{field}' holds {found}")]
    FieldKindMismatch {
        entity: String,
        field: String,
        found: &'static str,
    },

    #[error("entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },
}

impl SessionError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::Busy => ErrorClass::Conflict,
            Self::EntityNotFound { .. } | Self::UnknownField { .. } => ErrorClass::NotFound,
            Self::Detached { .. }
            | Self::DetachedInstance { .. }
            | Self::FieldKindMismatch { .. } => ErrorClass::InvariantViolation,
        }
    }
}

impl From<SessionError> for InternalError {
    fn from(err: SessionError) -> Self {
        Self::with_detail(err.class(), ErrorOrigin::Session, ErrorDetail::Session(Box::new(err)))
    }
}

///
/// SessionCore
///
/// Mutable session state behind the `RefCell`. Placeholder loaders hold a
/// weak pointer to it plus the generation they were created in.
///

struct SessionCore<S> {
    metadata: Arc<Metadata>,
    storage: S,
    config: SessionConfig,
    identity_map: IdentityMap<EntityHandle>,
    uow: UnitOfWork,
    generation: u64,
    /// Handles whose row is being decoded; cyclic eager paths stop here.
    filling: Vec<EntityHandle>,
    this: Weak<RefCell<Self>>,
}

///
/// Session
///
/// Single-threaded unit of work over one storage executor.
///

pub struct Session<S: StorageExecutor + 'static> {
    core: Rc<RefCell<SessionCore<S>>>,
}

impl<S: StorageExecutor + 'static> Session<S> {
    #[must_use]
    pub fn new(metadata: Arc<Metadata>, storage: S, config: SessionConfig) -> Self {
        let core = Rc::new_cyclic(|this| {
            RefCell::new(SessionCore {
                metadata,
                storage,
                config,
                identity_map: IdentityMap::new(EntityHandle::ptr_eq),
                uow: UnitOfWork::new(),
                generation: 0,
                filling: Vec::new(),
                this: this.clone(),
            })
        });

        Self { core }
    }

    #[must_use]
    pub fn metadata(&self) -> Arc<Metadata> {
        Arc::clone(&self.core.borrow().metadata)
    }

    /// Schedule a new instance for insertion; re-manages a removed one.
    pub fn persist(&self, handle: &EntityHandle) -> Result<(), InternalError> {
        let mut core = self.core_mut()?;
        core.metadata.entity(handle.entity())?;

        match handle.state() {
            Lifecycle::New => {
                core.uow.schedule_insert(handle);
            }
            Lifecycle::Managed => {}
            Lifecycle::Removed => {
                core.uow.unschedule(handle);
                handle.set_state(Lifecycle::Managed);
            }
            Lifecycle::Detached => return Err(detached_instance(handle)),
        }

        Ok(())
    }

    /// Schedule a managed instance for deletion; un-schedules a new one.
    pub fn remove(&self, handle: &EntityHandle) -> Result<(), InternalError> {
        let mut core = self.core_mut()?;

        match handle.state() {
            Lifecycle::New => core.uow.unschedule(handle),
            Lifecycle::Managed => {
                handle.set_state(Lifecycle::Removed);
                core.uow.schedule_delete(handle);
            }
            Lifecycle::Removed => {}
            Lifecycle::Detached => return Err(detached_instance(handle)),
        }

        Ok(())
    }

    /// Stop tracking one instance. Its identity becomes free in this session.
    pub fn detach(&self, handle: &EntityHandle) -> Result<(), InternalError> {
        let mut core = self.core_mut()?;
        core.uow.unschedule(handle);

        if let Some(storage) = handle.storage_identifier() {
            let entity = handle.entity();
            if core
                .identity_map
                .get(entity, &storage)
                .is_some_and(|live| live.ptr_eq(handle))
            {
                core.identity_map.remove(entity, &storage);
            }
        }
        handle.set_state(Lifecycle::Detached);

        Ok(())
    }

    /// Whether the instance is scheduled or managed by this session.
    pub fn contains(&self, handle: &EntityHandle) -> Result<bool, InternalError> {
        let core = self.core_mut()?;
        if core.uow.is_scheduled_insert(handle) {
            return Ok(true);
        }

        Ok(handle.state() == Lifecycle::Managed
            && handle.storage_identifier().is_some_and(|storage| {
                core.identity_map
                    .get(handle.entity(), &storage)
                    .is_some_and(|live| live.ptr_eq(handle))
            }))
    }

    /// Write all scheduled and detected changes.
    pub fn flush(&self) -> Result<FlushReport, InternalError> {
        self.core_mut()?.flush()
    }

    /// Detach everything and reset the unit of work, including a failure.
    ///
    /// Outstanding placeholders from before the clear can no longer resolve.
    pub fn clear(&self) -> Result<(), InternalError> {
        let mut core = self.core_mut()?;

        for (_, handle) in core.identity_map.iter() {
            handle.set_state(Lifecycle::Detached);
        }
        core.identity_map.clear();
        core.uow.reset();
        core.generation += 1;

        debug!(target: "keel::session", generation = core.generation, "session cleared");

        Ok(())
    }

    /// Find an instance by single value or composite identifier.
    pub fn find(
        &self,
        entity: &str,
        identifier: impl Into<IdentifierInput>,
    ) -> Result<Option<EntityHandle>, InternalError> {
        let mut core = self.core_mut()?;
        let metadata = Arc::clone(&core.metadata);
        let entity = metadata.entity_by_name(entity)?.name();

        let codec = IdentifierCodec::new(&metadata);
        let identifier = codec.normalize_input(entity, identifier.into())?;
        let storage = codec.encode(entity, &identifier)?;

        core.find(entity, &storage)
    }

    /// Find an instance by its already-converted storage identifier.
    pub fn find_by_storage(
        &self,
        entity: &str,
        storage: &StorageIdentifier,
    ) -> Result<Option<EntityHandle>, InternalError> {
        let mut core = self.core_mut()?;
        let entity = core.metadata.entity_by_name(entity)?.name();

        core.find(entity, storage)
    }

    /// Resolve a placeholder now.
    pub fn resolve(&self, handle: &EntityHandle) -> Result<(), InternalError> {
        handle.resolve()
    }

    #[must_use]
    pub fn state(&self) -> FlushState {
        self.core.borrow().uow.state()
    }

    #[must_use]
    pub fn identity_map_len(&self) -> usize {
        self.core.borrow().identity_map.len()
    }

    #[must_use]
    pub fn storage(&self) -> Ref<'_, S> {
        Ref::map(self.core.borrow(), |core| &core.storage)
    }

    #[must_use]
    pub fn storage_mut(&self) -> RefMut<'_, S> {
        RefMut::map(self.core.borrow_mut(), |core| &mut core.storage)
    }

    fn core_mut(&self) -> Result<RefMut<'_, SessionCore<S>>, InternalError> {
        self.core
            .try_borrow_mut()
            .map_err(|_| SessionError::Busy.into())
    }
}

fn detached_instance(handle: &EntityHandle) -> InternalError {
    SessionError::DetachedInstance {
        entity: handle.entity().to_string(),
    }
    .into()
}
