//! Module: db::identity_map
//! Responsibility: per-session deduplication of entity instances by identity.
//! Does not own: identifier encoding (callers hand in a `StorageIdentifier`).
//!
//! Invariants:
//! - At most one live entry per (entity, canonical key).
//! - A factory runs at most once per key while its entry is alive.
//! - After `remove`, the next lookup for the key builds a fresh instance.


use crate::{
    db::{identifier::StorageIdentifier, identity::EntityName},
    error::InternalError,
};
use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
};

///
/// IdentityKey
///
/// Entity name plus the canonical form of its storage identifier.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IdentityKey {
    pub entity: EntityName,
    pub key: String,
}

impl IdentityKey {
    #[must_use]
    pub fn new(entity: EntityName, storage: &StorageIdentifier) -> Self {
        Self {
            entity,
            key: storage.canonical_key(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity, EntityName::KEY_SEPARATOR, self.key)
    }
}

///
/// Registration
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Registration {
    /// The key was free; the instance is now registered.
    Inserted,
    /// The same instance was already registered.
    AlreadyPresent,
}

///
/// IdentityMap
///
/// Generic over the instance type; `same` decides whether two instances are
/// the same object (pointer identity for entity handles).
///

pub struct IdentityMap<T: Clone> {
    entries: BTreeMap<IdentityKey, T>,
    same: fn(&T, &T) -> bool,
}

impl<T: Clone> IdentityMap<T> {
    #[must_use]
    pub const fn new(same: fn(&T, &T) -> bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            same,
        }
    }

    #[must_use]
    pub fn get(&self, entity: EntityName, storage: &StorageIdentifier) -> Option<T> {
        self.entries.get(&IdentityKey::new(entity, storage)).cloned()
    }

    #[must_use]
    pub fn contains(&self, entity: EntityName, storage: &StorageIdentifier) -> bool {
        self.entries.contains_key(&IdentityKey::new(entity, storage))
    }

    /// Return the live instance for the key, building and registering one
    /// through `factory` when absent.
    pub fn get_or_register(
        &mut self,
        entity: EntityName,
        storage: &StorageIdentifier,
        factory: impl FnOnce() -> T,
    ) -> T {
        self.entries
            .entry(IdentityKey::new(entity, storage))
            .or_insert_with(factory)
            .clone()
    }

    /// Fallible variant of [`Self::get_or_register`]; nothing is registered
    /// when the factory fails.
    pub fn try_get_or_register(
        &mut self,
        entity: EntityName,
        storage: &StorageIdentifier,
        factory: impl FnOnce() -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        match self.entries.entry(IdentityKey::new(entity, storage)) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => Ok(entry.insert(factory()?).clone()),
        }
    }

    /// Register a known instance; conflicts if a different instance owns the key.
    pub fn register(
        &mut self,
        entity: EntityName,
        storage: &StorageIdentifier,
        instance: T,
    ) -> Result<Registration, InternalError> {
        let key = IdentityKey::new(entity, storage);
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                if (self.same)(entry.get(), &instance) {
                    Ok(Registration::AlreadyPresent)
                } else {
                    Err(InternalError::identity_conflict(format!(
                        "identity '{}' is already bound to another instance",
                        entry.key()
                    )))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(instance);
                Ok(Registration::Inserted)
            }
        }
    }

    /// Detach the entry for the key, returning the instance it held.
    pub fn remove(&mut self, entity: EntityName, storage: &StorageIdentifier) -> Option<T> {
        self.entries.remove(&IdentityKey::new(entity, storage))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &T)> {
        self.entries.iter()
    }
}

impl<T: Clone> fmt::Debug for IdentityMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.keys().map(ToString::to_string))
            .finish()
    }
}
