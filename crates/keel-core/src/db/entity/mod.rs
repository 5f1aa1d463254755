//! Module: db::entity
//! Responsibility: in-memory entity instances and lazy placeholders shared by
//! one session.
//! Does not own: identity-map registration or persistence (see `db::session`).
//!
//! Invariants:
//! - A handle is an identity: clones share one cell, equality is `ptr_eq`.
//! - An unresolved placeholder holds only its identifier slots, so reading an
//!   identifier field never triggers resolution.
//! - Resolution runs the loader without any borrow of the cell held.


use crate::{
    db::{identifier::StorageIdentifier, identity::EntityName, session::SessionError},
    error::InternalError,
    value::Value,
};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::Rc,
};

/// Resolution callback installed on placeholders by the owning session.
pub(crate) type Loader = Rc<dyn Fn(&EntityHandle) -> Result<(), InternalError>>;

///
/// Lifecycle
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    /// Constructed by the application, not yet flushed.
    New,
    /// Known to a session and mirrored in storage.
    Managed,
    /// Scheduled for deletion.
    Removed,
    /// No longer tracked by any session.
    Detached,
}

///
/// Slot
///

#[derive(Clone, Debug)]
pub enum Slot {
    Value(Value),
    Reference(Option<EntityHandle>),
}

///
/// Lazy
///
/// Explicit suspend-until-accessed contract for placeholders.
///

pub trait Lazy {
    fn is_resolved(&self) -> bool;

    /// Load the full state now. A no-op once resolved.
    fn resolve(&self) -> Result<(), InternalError>;
}

///
/// EntityCell
///

struct EntityCell {
    entity: EntityName,
    slots: BTreeMap<String, Slot>,
    lifecycle: Lifecycle,
    storage_id: Option<StorageIdentifier>,
    snapshot: Option<Vec<Value>>,
    loader: Option<Loader>,
}

///
/// EntityHandle
///
/// Shared, single-session reference to one entity instance.
///

#[derive(Clone)]
pub struct EntityHandle(Rc<RefCell<EntityCell>>);

impl EntityHandle {
    /// Create a new, unmanaged instance of `entity`.
    #[must_use]
    pub fn new(entity: EntityName) -> Self {
        Self::from_cell(EntityCell {
            entity,
            slots: BTreeMap::new(),
            lifecycle: Lifecycle::New,
            storage_id: None,
            snapshot: None,
            loader: None,
        })
    }

    /// Builder-style scalar assignment for freshly constructed instances.
    #[must_use]
    pub fn with(self, field: &str, value: impl Into<Value>) -> Self {
        self.write_slot(field, Slot::Value(value.into()));
        self
    }

    /// Builder-style reference assignment for freshly constructed instances.
    #[must_use]
    pub fn with_reference(self, field: &str, target: &Self) -> Self {
        self.write_slot(field, Slot::Reference(Some(target.clone())));
        self
    }

    #[must_use]
    pub fn entity(&self) -> EntityName {
        self.0.borrow().entity
    }

    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.0.borrow().lifecycle
    }

    /// Storage identifier, once the instance has been flushed or loaded.
    #[must_use]
    pub fn storage_identifier(&self) -> Option<StorageIdentifier> {
        self.0.borrow().storage_id.clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Read a scalar attribute. Unset attributes read as `Null`.
    pub fn get(&self, field: &str) -> Result<Value, InternalError> {
        match self.read_slot(field)? {
            None | Some(Slot::Value(Value::Null)) => Ok(Value::Null),
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Reference(_)) => Err(self.kind_mismatch(field, "a reference")),
        }
    }

    /// Read a reference attribute. Unset references read as `None`.
    pub fn reference(&self, field: &str) -> Result<Option<Self>, InternalError> {
        match self.read_slot(field)? {
            None | Some(Slot::Value(Value::Null)) => Ok(None),
            Some(Slot::Reference(target)) => Ok(target),
            Some(Slot::Value(_)) => Err(self.kind_mismatch(field, "a scalar")),
        }
    }

    /// Assign a scalar attribute; resolves a placeholder first.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), InternalError> {
        self.resolve()?;
        self.write_slot(field, Slot::Value(value.into()));
        Ok(())
    }

    /// Assign or clear a reference attribute; resolves a placeholder first.
    pub fn set_reference(&self, field: &str, target: Option<&Self>) -> Result<(), InternalError> {
        self.resolve()?;
        self.write_slot(field, Slot::Reference(target.cloned()));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session-facing surface
    // ------------------------------------------------------------------

    /// Unresolved placeholder holding only identifier slots.
    pub(crate) fn placeholder(
        entity: EntityName,
        identifier_slots: BTreeMap<String, Slot>,
        storage_id: StorageIdentifier,
        loader: Loader,
    ) -> Self {
        Self::from_cell(EntityCell {
            entity,
            slots: identifier_slots,
            lifecycle: Lifecycle::Managed,
            storage_id: Some(storage_id),
            snapshot: None,
            loader: Some(loader),
        })
    }

    /// Read a slot without triggering resolution.
    pub(crate) fn peek(&self, field: &str) -> Option<Slot> {
        self.0.borrow().slots.get(field).cloned()
    }

    pub(crate) fn slot_names(&self) -> Vec<String> {
        self.0.borrow().slots.keys().cloned().collect()
    }

    pub(crate) fn write_slot(&self, field: &str, slot: Slot) {
        self.0.borrow_mut().slots.insert(field.to_string(), slot);
    }

    pub(crate) fn set_state(&self, lifecycle: Lifecycle) {
        self.0.borrow_mut().lifecycle = lifecycle;
    }

    pub(crate) fn set_storage_identifier(&self, storage_id: Option<StorageIdentifier>) {
        self.0.borrow_mut().storage_id = storage_id;
    }

    pub(crate) fn snapshot(&self) -> Option<Vec<Value>> {
        self.0.borrow().snapshot.clone()
    }

    pub(crate) fn set_snapshot(&self, row: Option<Vec<Value>>) {
        self.0.borrow_mut().snapshot = row;
    }

    /// Complete a placeholder: drop the loader so later reads stay local.
    pub(crate) fn mark_resolved(&self) {
        self.0.borrow_mut().loader = None;
    }

    fn from_cell(cell: EntityCell) -> Self {
        Self(Rc::new(RefCell::new(cell)))
    }

    fn read_slot(&self, field: &str) -> Result<Option<Slot>, InternalError> {
        // Present slots on a placeholder are identifier slots.
        if let Some(slot) = self.peek(field) {
            return Ok(Some(slot));
        }

        self.resolve()?;

        Ok(self.peek(field))
    }

    fn kind_mismatch(&self, field: &str, found: &'static str) -> InternalError {
        SessionError::FieldKindMismatch {
            entity: self.entity().to_string(),
            field: field.to_string(),
            found,
        }
        .into()
    }
}

impl Lazy for EntityHandle {
    fn is_resolved(&self) -> bool {
        self.0.borrow().loader.is_none()
    }

    fn resolve(&self) -> Result<(), InternalError> {
        let loader = self.0.borrow().loader.clone();
        let Some(loader) = loader else {
            return Ok(());
        };

        loader(self)
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EntityHandle {}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Slots may point back at this handle; print identity fields only.
        match self.0.try_borrow() {
            Ok(cell) => f
                .debug_struct("EntityHandle")
                .field("entity", &cell.entity)
                .field("lifecycle", &cell.lifecycle)
                .field("storage_id", &cell.storage_id)
                .field("resolved", &cell.loader.is_none())
                .finish(),
            Err(_) => f.write_str("EntityHandle(<borrowed>)"),
        }
    }
}
