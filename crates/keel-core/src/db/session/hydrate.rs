use super::{SessionCore, SessionError};
use crate::{
    db::{
        entity::{EntityHandle, Lazy, Lifecycle, Loader, Slot},
        identifier::{
            IdValue, Identifier, IdentifierCodec, IdentifierError, ReferenceResolver,
            StorageIdentifier,
        },
        identity::EntityName,
        storage::{Statement, StorageExecutor},
    },
    error::InternalError,
    metadata::EntityMetadata,
    model::{FetchMode, FieldKind},
    obs::sink::{self, MetricsEvent},
    value::Value,
};
use std::{collections::BTreeMap, rc::Rc, sync::Arc};
use tracing::debug;

impl<S: StorageExecutor + 'static> SessionCore<S> {
    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub(super) fn find(
        &mut self,
        entity: EntityName,
        storage: &StorageIdentifier,
    ) -> Result<Option<EntityHandle>, InternalError> {
        if let Some(handle) = self.identity_map.get(entity, storage) {
            sink::record(MetricsEvent::Find {
                entity,
                identity_hit: true,
            });

            if handle.state() == Lifecycle::Removed {
                return Ok(None);
            }
            self.initialize(&handle)?;

            return Ok(Some(handle));
        }

        sink::record(MetricsEvent::Find {
            entity,
            identity_hit: false,
        });

        self.load(entity, storage)
    }

    /// Select one row by identifier and hydrate it.
    fn load(
        &mut self,
        entity: EntityName,
        storage: &StorageIdentifier,
    ) -> Result<Option<EntityHandle>, InternalError> {
        let metadata = Arc::clone(&self.metadata);
        let layout = metadata.entity(entity)?;

        let Some(row) = self.select_one(
            layout.table(),
            layout.select_columns(),
            layout.identifier_columns(),
            storage.values(),
        )?
        else {
            return Ok(None);
        };

        self.hydrate(layout, row).map(Some)
    }

    fn select_one(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &[String],
        params: &[Value],
    ) -> Result<Option<Vec<Value>>, InternalError> {
        let statement = Statement::Select {
            table: table.to_string(),
            columns: columns.to_vec(),
            filter: filter.to_vec(),
            params: params.to_vec(),
            limit: Some(1),
        };
        let rows = self.storage.execute(&statement)?;

        Ok(rows.into_iter().next().map(|row| row.0))
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    /// Turn one select row into the live instance for its identity.
    ///
    /// The identity map is consulted on the raw storage identifier before any
    /// reference in the row is followed. A fresh registration is withdrawn if
    /// the row cannot be decoded.
    fn hydrate(
        &mut self,
        layout: &EntityMetadata,
        row: Vec<Value>,
    ) -> Result<EntityHandle, InternalError> {
        let entity = layout.name();
        let arity = layout.identifier_arity();
        let expected = layout.select_columns().len();
        if row.len() < expected {
            return Err(IdentifierError::MalformedRow {
                entity: entity.to_string(),
                expected,
                found: row.len(),
            }
            .into());
        }

        let storage = StorageIdentifier::from_storage(row[..arity].to_vec());
        let (handle, fresh) = match self.identity_map.get(entity, &storage) {
            Some(existing) if existing.is_resolved() || self.is_filling(&existing) => {
                return Ok(existing);
            }
            Some(placeholder) => (placeholder, false),
            None => {
                let handle = EntityHandle::placeholder(
                    entity,
                    BTreeMap::new(),
                    storage.clone(),
                    self.loader(),
                );
                self.identity_map.register(entity, &storage, handle.clone())?;
                (handle, true)
            }
        };

        if let Err(err) = self.fill(&handle, layout, &row, !fresh) {
            if fresh {
                self.identity_map.remove(entity, &storage);
            }
            return Err(err);
        }

        Ok(handle)
    }

    /// Populate every slot of `handle` from a select row.
    ///
    /// Nothing is written until the whole row decodes, so a failure leaves
    /// the handle unresolved with its loader in place.
    fn fill(
        &mut self,
        handle: &EntityHandle,
        layout: &EntityMetadata,
        row: &[Value],
        proxy: bool,
    ) -> Result<(), InternalError> {
        let entity = layout.name();

        self.filling.push(handle.clone());
        let decoded = self.decode_slots(layout, row);
        self.filling.pop();
        let (slots, storage) = decoded?;

        for (name, slot) in slots {
            handle.write_slot(&name, slot);
        }
        handle.set_snapshot(Some(row[..layout.select_columns().len()].to_vec()));
        handle.mark_resolved();

        sink::record(MetricsEvent::RowsHydrated { entity, rows: 1 });
        if proxy {
            sink::record(MetricsEvent::ProxyInitialized { entity });
        }

        debug!(
            target: "keel::session",
            entity = %entity,
            key = %storage.canonical_key(),
            placeholder = proxy,
            "row hydrated"
        );

        Ok(())
    }

    /// Decode identifier and field slots of one row without touching any
    /// handle.
    fn decode_slots(
        &mut self,
        layout: &EntityMetadata,
        row: &[Value],
    ) -> Result<(Vec<(String, Slot)>, StorageIdentifier), InternalError> {
        let entity = layout.name();
        let metadata = Arc::clone(&self.metadata);
        let codec = IdentifierCodec::new(&metadata);
        let (identifier, storage) = codec.decode(entity, row, self)?;

        let mut slots = Vec::new();
        for (name, value) in identifier.iter() {
            slots.push((name.to_string(), slot_from(entity, name, value)?));
        }

        for (field, range) in layout.field_layouts() {
            let slot = match &field.kind {
                FieldKind::Scalar { converter, .. } => {
                    let raw = &row[range.start];
                    let value = match converter {
                        Some(converter) => metadata.converter(converter)?.to_application(raw)?,
                        None => raw.clone(),
                    };

                    Slot::Value(value)
                }
                FieldKind::ToOne { target, fetch, .. } => {
                    let columns = &row[range];
                    if columns.iter().all(Value::is_null) {
                        Slot::Reference(None)
                    } else if columns.iter().any(Value::is_null) {
                        return Err(InternalError::storage_corruption(format!(
                            "foreign key '{entity}.{}' is partially NULL",
                            field.name
                        )));
                    } else {
                        let target_storage = StorageIdentifier::from_storage(columns.to_vec());
                        let target = self.reference(*target, *fetch, target_storage, None)?;

                        Slot::Reference(Some(target))
                    }
                }
                FieldKind::InverseToOne { target, mapped_by } => {
                    Slot::Reference(self.inverse(*target, mapped_by, &storage)?)
                }
            };

            slots.push((field.name.clone(), slot));
        }

        Ok((slots, storage))
    }

    fn is_filling(&self, handle: &EntityHandle) -> bool {
        self.filling.iter().any(|filling| filling.ptr_eq(handle))
    }

    /// The owning side of a one-to-one, loaded by its join columns.
    fn inverse(
        &mut self,
        target: EntityName,
        mapped_by: &str,
        storage: &StorageIdentifier,
    ) -> Result<Option<EntityHandle>, InternalError> {
        let metadata = Arc::clone(&self.metadata);
        let owning = metadata.entity(target)?;

        let Some(FieldKind::ToOne { join_columns, .. }) =
            owning.descriptor().field(mapped_by).map(|field| &field.kind)
        else {
            return Err(InternalError::session_invariant(format!(
                "'{target}.{mapped_by}' is not a to-one reference"
            )));
        };

        match self.select_one(
            owning.table(),
            owning.select_columns(),
            join_columns,
            storage.values(),
        )? {
            Some(row) => self.hydrate(owning, row).map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// The live instance for a referenced identity.
    ///
    /// Reuses the identity map, loads eagerly when asked, and otherwise
    /// registers a placeholder holding only identifier slots.
    fn reference(
        &mut self,
        target: EntityName,
        fetch: FetchMode,
        storage: StorageIdentifier,
        identifier: Option<Identifier>,
    ) -> Result<EntityHandle, InternalError> {
        if let Some(existing) = self.identity_map.get(target, &storage) {
            return Ok(existing);
        }

        if fetch == FetchMode::Eager || self.config.force_eager {
            return self.load(target, &storage)?.ok_or_else(|| {
                SessionError::EntityNotFound {
                    entity: target.to_string(),
                    key: storage.canonical_key(),
                }
                .into()
            });
        }

        let identifier = match identifier {
            Some(identifier) => identifier,
            None => {
                let metadata = Arc::clone(&self.metadata);
                IdentifierCodec::new(&metadata)
                    .decode(target, storage.values(), self)?
                    .0
            }
        };

        // Decoding may have registered this identity through a nested path.
        if let Some(existing) = self.identity_map.get(target, &storage) {
            return Ok(existing);
        }

        let mut slots = BTreeMap::new();
        for (name, value) in identifier.iter() {
            slots.insert(name.to_string(), slot_from(target, name, value)?);
        }

        let handle = EntityHandle::placeholder(target, slots, storage.clone(), self.loader());
        self.identity_map.register(target, &storage, handle.clone())?;

        sink::record(MetricsEvent::ProxyCreated { entity: target });

        Ok(handle)
    }

    /// Loader installed on placeholders. Fails once the session is dropped
    /// or cleared, and while the session is in use.
    fn loader(&self) -> Loader {
        let session = self.this.clone();
        let generation = self.generation;

        Rc::new(move |handle: &EntityHandle| -> Result<(), InternalError> {
            let detached = || SessionError::Detached {
                entity: handle.entity().to_string(),
            };

            let strong = session.upgrade().ok_or_else(detached)?;
            let mut core = strong.try_borrow_mut().map_err(|_| SessionError::Busy)?;
            if core.generation != generation {
                return Err(detached().into());
            }

            core.initialize(handle)
        })
    }

    /// Load the full state of a placeholder.
    pub(super) fn initialize(&mut self, handle: &EntityHandle) -> Result<(), InternalError> {
        if handle.is_resolved() || self.is_filling(handle) {
            return Ok(());
        }

        let entity = handle.entity();
        let storage = handle.storage_identifier().ok_or_else(|| {
            InternalError::session_invariant("placeholder has no storage identifier")
        })?;

        let metadata = Arc::clone(&self.metadata);
        let layout = metadata.entity(entity)?;
        let row = self
            .select_one(
                layout.table(),
                layout.select_columns(),
                layout.identifier_columns(),
                storage.values(),
            )?
            .ok_or_else(|| SessionError::EntityNotFound {
                entity: entity.to_string(),
                key: storage.canonical_key(),
            })?;

        self.fill(handle, layout, &row, true)
    }
}

impl<S: StorageExecutor + 'static> ReferenceResolver for SessionCore<S> {
    fn resolve_reference(
        &mut self,
        target: EntityName,
        fetch: FetchMode,
        storage: StorageIdentifier,
        identifier: Identifier,
    ) -> Result<IdValue, InternalError> {
        self.reference(target, fetch, storage, Some(identifier))
            .map(IdValue::Entity)
    }
}

fn slot_from(entity: EntityName, field: &str, value: &IdValue) -> Result<Slot, InternalError> {
    match value {
        IdValue::Scalar(value) => Ok(Slot::Value(value.clone())),
        IdValue::Entity(handle) => Ok(Slot::Reference(Some(handle.clone()))),
        IdValue::Identifier(_) => Err(InternalError::session_invariant(format!(
            "identifier component '{entity}.{field}' was not resolved to an instance"
        ))),
    }
}
